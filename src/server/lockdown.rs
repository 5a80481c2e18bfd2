//! Lockdown Tracker
//!
//! Repeated failed logins temporarily ban their subject — the source IP or
//! the presented token, depending on configuration. State survives process
//! restarts through a JSON sidecar file:
//!
//! ```json
//! { "203.0.113.9": { "time": 1722600000000, "attempts": 3 } }
//! ```
//!
//! `time` is the unix-millisecond expiry of the entry; `attempts` is the
//! failure count inside the current cooldown window. The sidecar is
//! rewritten atomically after every change and removed outright once no
//! subject remains tracked.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::LockdownMode;

/// Default sidecar file name, in the process working directory.
pub const SIDECAR_FILE: &str = ".lockdown";

/// One subject's failure record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LockdownEntry {
    /// Unix-millisecond expiry of this entry.
    pub time: u64,

    /// Failures inside the current cooldown window.
    pub attempts: u32,
}

/// Tracks failed-login counts per subject and persists them.
#[derive(Debug)]
pub struct LockdownTracker {
    mode: LockdownMode,
    max_attempts: u32,
    cooldown_ms: u64,
    path: PathBuf,
    entries: Mutex<HashMap<String, LockdownEntry>>,
}

impl LockdownTracker {
    /// Creates a tracker, loading any existing sidecar state.
    pub fn new(mode: LockdownMode, max_attempts: u32, cooldown_secs: u64, path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed lockdown sidecar ignored");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        LockdownTracker {
            mode,
            max_attempts,
            cooldown_ms: cooldown_secs * 1000,
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Picks the lockdown subject for a connection attempt, or `None` when
    /// tracking is disabled.
    pub fn subject(&self, ip: &str, token: &str) -> Option<String> {
        if self.max_attempts == 0 {
            return None;
        }
        match self.mode {
            LockdownMode::Ip => Some(ip.to_string()),
            LockdownMode::Token => Some(token.to_string()),
            LockdownMode::None => None,
        }
    }

    /// Whether a subject is currently locked out.
    ///
    /// Expired entries are pruned on the way, which is also what removes
    /// the sidecar once nobody is tracked any more.
    pub fn is_locked_down(&self, subject: &str) -> bool {
        if self.max_attempts == 0 {
            return false;
        }
        let now = now_ms();
        let mut entries = self.entries.lock().expect("lockdown mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.time >= now);
        if entries.len() != before {
            self.save(&mut entries, now);
        }
        entries
            .get(subject)
            .map(|e| e.attempts >= self.max_attempts)
            .unwrap_or(false)
    }

    /// Records a failed attempt. Returns true when the subject is now
    /// locked out.
    ///
    /// A stale entry (expired window) restarts its count, so only failures
    /// inside one cooldown window accumulate. The sidecar is rewritten
    /// under the same lock.
    pub fn record_failure(&self, subject: &str) -> bool {
        if self.max_attempts == 0 {
            return false;
        }

        let now = now_ms();
        let mut entries = self.entries.lock().expect("lockdown mutex poisoned");

        let entry = entries.entry(subject.to_string()).or_insert(LockdownEntry {
            time: now,
            attempts: 0,
        });
        if now > entry.time {
            entry.attempts = 0;
        }
        entry.attempts += 1;
        entry.time = now + self.cooldown_ms;
        let locked = entry.attempts >= self.max_attempts;

        debug!(subject, attempts = entry.attempts, locked, "failed login recorded");
        self.save(&mut entries, now);
        locked
    }

    /// Number of tracked subjects (tests and `info`).
    pub fn tracked(&self) -> usize {
        self.entries.lock().expect("lockdown mutex poisoned").len()
    }

    /// Prunes expired entries and rewrites (or removes) the sidecar.
    fn save(&self, entries: &mut HashMap<String, LockdownEntry>, now: u64) {
        entries.retain(|_, e| e.time >= now);

        if entries.is_empty() {
            if self.path.exists() {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "could not remove lockdown sidecar");
                }
            }
            return;
        }

        let json = match serde_json::to_string(entries) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not serialize lockdown state");
                return;
            }
        };

        // Write-then-rename keeps the sidecar whole under a crash.
        let tmp = self.path.with_extension("lockdown.tmp");
        let result = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "could not persist lockdown state");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
