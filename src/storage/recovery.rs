//! Startup Recovery
//!
//! After the shard headers validate, the volatile state is completed by
//! replaying every change-log file in the database directory, oldest
//! first. Replay goes through the core API with re-logging suppressed, so
//! running it any number of times over the same files yields the same
//! in-memory state.
//!
//! A file that fails to read or parse is logged and skipped; the rest of
//! the logs still apply. Startup never aborts over a bad log file.

use std::path::Path;

use tracing::{debug, warn};

use crate::aol::{list_log_files, parse_document, LogLine};
use crate::storage::store::Store;

/// What a replay pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaySummary {
    /// Log files found.
    pub files: usize,

    /// Files dropped because they failed to read or parse.
    pub skipped_files: usize,

    /// Individual key mutations applied.
    pub applied: usize,
}

/// Replays every change-log file under `dir` into `store`.
pub async fn replay_logs(store: &Store, dir: &Path) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    let logs = match list_log_files(dir) {
        Ok(logs) => logs,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not enumerate change logs");
            return summary;
        }
    };

    for path in logs {
        summary.files += 1;

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable change log, skipped");
                summary.skipped_files += 1;
                continue;
            }
        };

        let lines = match parse_document(&content) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unparsable change log, skipped");
                summary.skipped_files += 1;
                continue;
            }
        };

        let mut applied = 0usize;
        for line in lines {
            match line {
                LogLine::Set { keys, value } => {
                    for key in keys {
                        store.set_unsafe(&key, value.clone()).await;
                        applied += 1;
                    }
                }
                LogLine::Remove { keys } => {
                    for key in keys {
                        store.remove_replayed(&key).await;
                        applied += 1;
                    }
                }
            }
        }
        summary.applied += applied;
        debug!(file = %path.display(), applied, "change log replayed");
    }

    summary
}
