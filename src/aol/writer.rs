//! Change-Log Writer
//!
//! A single background task owns the current `.sfb` file. The store sends
//! it `set`/`remove` ops over a bounded channel; the task coalesces them by
//! key in memory and drains everything to disk on a fixed interval.
//!
//! ## Design
//!
//! ```text
//!  Store ──set/remove──> [mpsc 4096] ──> ┌─────────────────────┐
//!                                        │   writer task       │
//!                                        │  pending: key → op  │
//!                                        │  every 5 s: flush   │──> <ts>.sfb
//!                                        └─────────────────────┘
//! ```
//!
//! Coalescing means repeated sets of one key inside a flush interval
//! produce exactly one line with the latest value. A mutation is
//! acknowledged once the channel accepts it; callers tolerate losing the
//! final interval of writes on a crash — that is the durability contract.
//!
//! A failed flush keeps the pending map and dirty flag so the next tick
//! retries. When a write would push the current file past the configured
//! size limit, the file is closed and a new one opens under a fresh
//! timestamp name.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aol::line::{format_remove, stringify_value};
use crate::codec::value::Value;

/// Capacity of the op channel between the store and the writer task.
pub const CHANNEL_CAPACITY: usize = 4096;

/// How long `enqueue` waits on a full channel before dropping the op.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default interval between flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// File extension of change-log files.
pub const LOG_EXTENSION: &str = "sfb";

/// Errors surfaced to mutation callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AolError {
    /// The op channel stayed full past [`ENQUEUE_TIMEOUT`].
    #[error("change log channel is full, op dropped")]
    ChannelFull,

    /// The writer task is gone.
    #[error("change log writer has shut down")]
    Closed,
}

/// A mutation bound for the change log.
#[derive(Debug, Clone, PartialEq)]
pub enum AolOp {
    Set { key: String, value: Value },
    Remove { key: String },
}

impl AolOp {
    fn key(&self) -> &str {
        match self {
            AolOp::Set { key, .. } => key,
            AolOp::Remove { key } => key,
        }
    }
}

/// Handle to the running writer task.
///
/// Dropping the handle signals shutdown; [`AolWriter::shutdown`] also waits
/// for the final drain.
#[derive(Debug)]
pub struct AolWriter {
    ops_tx: mpsc::Sender<AolOp>,
    shutdown_tx: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    flush_interval: Duration,
}

impl AolWriter {
    /// Starts the writer task for the given database directory.
    ///
    /// `size_limit` is the rotation threshold in bytes; 0 disables
    /// rotation. `flush_interval` is exposed for tests; production uses
    /// [`FLUSH_INTERVAL`].
    pub fn start(dir: PathBuf, size_limit: u64, flush_interval: Duration) -> AolWriter {
        let (ops_tx, ops_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            dir,
            size_limit,
            pending: HashMap::new(),
            current: None,
        };
        let handle = tokio::spawn(worker.run(ops_rx, shutdown_rx, flush_interval));
        info!("change log writer started");

        AolWriter {
            ops_tx,
            shutdown_tx,
            handle: std::sync::Mutex::new(Some(handle)),
            flush_interval,
        }
    }

    /// Hands an op to the writer task.
    ///
    /// Blocks the caller only while the channel is full, and only up to
    /// [`ENQUEUE_TIMEOUT`]; past that the op is dropped with an error so a
    /// stalled disk cannot wedge the serving path.
    pub async fn enqueue(&self, op: AolOp) -> Result<(), AolError> {
        match self.ops_tx.send_timeout(op, ENQUEUE_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(op)) => {
                error!(key = op.key(), "change log channel full, dropping op");
                Err(AolError::ChannelFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(op)) => {
                error!(key = op.key(), "change log writer closed, dropping op");
                Err(AolError::Closed)
            }
        }
    }

    /// Signals shutdown and waits up to one flush interval for the final
    /// drain to reach disk. Safe to call more than once; later calls
    /// return immediately.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("writer handle mutex poisoned").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.flush_interval, handle).await.is_err() {
                warn!("change log writer did not drain within one flush interval");
            }
        }
    }
}

impl Drop for AolWriter {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The coalesced fate of a key since the last flush.
enum Pending {
    Set(Value),
    Remove,
}

struct CurrentFile {
    file: File,
    len: u64,
    stamp: u64,
}

struct Worker {
    dir: PathBuf,
    size_limit: u64,
    pending: HashMap<String, Pending>,
    current: Option<CurrentFile>,
}

impl Worker {
    async fn run(
        mut self,
        mut ops_rx: mpsc::Receiver<AolOp>,
        mut shutdown_rx: watch::Receiver<bool>,
        flush_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first real flush lands one interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                op = ops_rx.recv() => match op {
                    Some(op) => self.absorb(op),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Final drain: absorb whatever is still queued, then flush once.
        while let Ok(op) = ops_rx.try_recv() {
            self.absorb(op);
        }
        if !self.pending.is_empty() {
            self.flush().await;
        }
        debug!("change log writer stopped");
    }

    /// Merges an op into the pending map. Later ops on the same key win.
    fn absorb(&mut self, op: AolOp) {
        match op {
            AolOp::Set { key, value } => {
                self.pending.insert(key, Pending::Set(value));
            }
            AolOp::Remove { key } => {
                self.pending.insert(key, Pending::Remove);
            }
        }
    }

    /// Drains the pending map to disk. On failure the map is kept intact
    /// and the next tick retries.
    async fn flush(&mut self) {
        let payload = self.render();
        match self.write(payload.as_bytes()).await {
            Ok(()) => {
                debug!(ops = self.pending.len(), bytes = payload.len(), "change log flushed");
                self.pending.clear();
            }
            Err(e) => {
                error!(error = %e, "change log flush failed, retrying next tick");
                self.current = None;
            }
        }
    }

    /// Renders the pending map into lines: one remove line for all deleted
    /// keys, then one set line per distinct value. Keys are sorted so the
    /// output is deterministic.
    fn render(&self) -> String {
        let mut removes: Vec<String> = Vec::new();
        let mut sets: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (key, pending) in &self.pending {
            match pending {
                Pending::Remove => removes.push(key.clone()),
                Pending::Set(value) => sets
                    .entry(stringify_value(value))
                    .or_default()
                    .push(key.clone()),
            }
        }

        let mut out = String::new();
        if !removes.is_empty() {
            removes.sort();
            out.push_str(&format_remove(&removes));
            out.push('\n');
        }
        for (value_text, mut keys) in sets {
            keys.sort();
            let mut line = keys.join("<");
            line.push('<');
            line.push_str(&value_text);
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        // Rotate before the write that would cross the limit.
        if self.size_limit > 0 {
            let occupied = match &self.current {
                Some(current) => Some((current.len, current.stamp)),
                None => None,
            };
            if let Some((len, stamp)) = occupied {
                if len > 0 && len + bytes.len() as u64 > self.size_limit {
                    let next_stamp = unix_seconds().max(stamp + 1);
                    info!(stamp = next_stamp, "rotating change log");
                    self.current = Some(open_log(&self.dir, next_stamp).await?);
                }
            }
        }

        if self.current.is_none() {
            self.current = Some(open_log(&self.dir, unix_seconds()).await?);
        }

        let current = self.current.as_mut().expect("current log file just opened");
        current.file.write_all(bytes).await?;
        current.file.flush().await?;
        current.file.sync_all().await?;
        current.len += bytes.len() as u64;
        Ok(())
    }
}

async fn open_log(dir: &Path, stamp: u64) -> std::io::Result<CurrentFile> {
    let path = dir.join(format!("{}.{}", stamp, LOG_EXTENSION));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    let len = file.metadata().await?.len();
    Ok(CurrentFile { file, len, stamp })
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lists the change-log files in a directory, oldest first.
///
/// Only names of the form `<digits>.sfb` qualify. Lexicographic order
/// equals numeric order for the fixed-width timestamps involved; ties are
/// broken by the full name.
pub fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().map(|e| e == LOG_EXTENSION).unwrap_or(false)
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false);
        if is_log {
            logs.push(path);
        }
    }
    logs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aol::line::{parse_document, LogLine};
    use tempfile::tempdir;

    async fn read_all_logs(dir: &Path) -> String {
        let mut out = String::new();
        for path in list_log_files(dir).unwrap() {
            out.push_str(&std::fs::read_to_string(path).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_coalescing_keeps_latest_value() {
        let dir = tempdir().unwrap();
        let writer = AolWriter::start(dir.path().to_path_buf(), 0, Duration::from_millis(50));

        for v in [1, 2, 3] {
            writer
                .enqueue(AolOp::Set {
                    key: "k".to_string(),
                    value: Value::Int(v),
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        writer.shutdown().await;

        let content = read_all_logs(dir.path()).await;
        let lines = parse_document(&content).unwrap();
        assert_eq!(
            lines,
            vec![LogLine::Set {
                keys: vec!["k".to_string()],
                value: Value::Int(3)
            }]
        );
    }

    #[tokio::test]
    async fn test_shared_value_grouping_and_removes() {
        let dir = tempdir().unwrap();
        let writer = AolWriter::start(dir.path().to_path_buf(), 0, Duration::from_secs(60));

        for key in ["a", "b"] {
            writer
                .enqueue(AolOp::Set {
                    key: key.to_string(),
                    value: Value::from("same"),
                })
                .await
                .unwrap();
        }
        writer
            .enqueue(AolOp::Remove {
                key: "gone".to_string(),
            })
            .await
            .unwrap();

        // Shutdown performs the final drain without waiting for a tick.
        writer.shutdown().await;

        let content = read_all_logs(dir.path()).await;
        assert!(content.contains("a<b<\"same\""));
        assert!(content.contains("#gone"));
    }

    #[tokio::test]
    async fn test_set_then_remove_coalesces_to_remove() {
        let dir = tempdir().unwrap();
        let writer = AolWriter::start(dir.path().to_path_buf(), 0, Duration::from_secs(60));

        writer
            .enqueue(AolOp::Set {
                key: "k".to_string(),
                value: Value::Int(1),
            })
            .await
            .unwrap();
        writer
            .enqueue(AolOp::Remove {
                key: "k".to_string(),
            })
            .await
            .unwrap();
        writer.shutdown().await;

        let lines = parse_document(&read_all_logs(dir.path()).await).unwrap();
        assert_eq!(
            lines,
            vec![LogLine::Remove {
                keys: vec!["k".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn test_rotation_by_size() {
        let dir = tempdir().unwrap();
        // Tiny limit: every flush lands in its own file.
        let writer = AolWriter::start(dir.path().to_path_buf(), 16, Duration::from_millis(40));

        for (i, key) in ["first_key", "second_key"].iter().enumerate() {
            writer
                .enqueue(AolOp::Set {
                    key: key.to_string(),
                    value: Value::Int(i as i64),
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        writer.shutdown().await;

        let logs = list_log_files(dir.path()).unwrap();
        assert!(logs.len() >= 2, "expected rotation, got {:?}", logs);

        // Replay order across files preserves write order.
        let lines = parse_document(&read_all_logs(dir.path()).await).unwrap();
        let keys: Vec<_> = lines
            .iter()
            .map(|l| match l {
                LogLine::Set { keys, .. } => keys[0].clone(),
                LogLine::Remove { keys } => keys[0].clone(),
            })
            .collect();
        assert_eq!(keys, vec!["first_key", "second_key"]);
    }

    #[test]
    fn test_list_log_files_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in [
            "1700000002.sfb",
            "1700000001.sfb",
            "meid-0.sfd",
            "notes.txt",
            "x1700.sfb",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let logs = list_log_files(dir.path()).unwrap();
        let names: Vec<_> = logs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["1700000001.sfb", "1700000002.sfb"]);
    }
}
