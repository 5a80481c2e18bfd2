//! Core Store
//!
//! The store coordinates everything below the shell: shard files, lookup
//! tables, the change-log writer, and the cap checks.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │                                                              │
//! │   get/exist ──read lock──┐                                   │
//! │                          ▼                                   │
//! │                 RwLock<Tables>  (by_key / by_digest / free)  │
//! │                          ▲                                   │
//! │   set/remove ─write lock─┘──enqueue──> AolWriter task        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations hold the write lock across both the change-log enqueue and
//! the table update, so readers observe either the full pre- or full
//! post-state of any mutation and the log order equals the acceptance
//! order. A mutation that the log rejects leaves no partial state behind.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::aol::{AolOp, AolWriter};
use crate::codec::decode::decode;
use crate::codec::digest::digest;
use crate::codec::encode::encoded_len;
use crate::codec::value::Value;
use crate::config::Config;
use crate::storage::meid::{scan_records, MeidError, Shard};
use crate::storage::tables::{SlotMeta, Tables};

/// Errors raised while opening a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Meid(#[from] MeidError),
}

/// Result of a `set` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The mutation was refused; no state changed.
    Failed = 0,
    /// An existing key's value was replaced.
    Updated = 1,
    /// A new key was created.
    Inserted = 2,
}

/// Round-robin assignment of new keys to shards.
///
/// The counter is monotonic; inactive shards are skipped. With one shard
/// this always yields 0.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Advances the counter and returns the next active shard index, or
    /// `None` when every shard has been sidelined.
    pub fn next(&self, shards: &[Shard]) -> Option<usize> {
        for _ in 0..shards.len() {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % shards.len();
            if shards[index].active {
                return Some(index);
            }
        }
        None
    }
}

/// A point-in-time snapshot of the store's counters.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub keys: usize,
    pub memory_used: u64,
    pub free_slots: usize,
    pub sets: u64,
    pub gets: u64,
    pub removes: u64,
    pub hits: u64,
    pub misses: u64,
}

/// The core storage engine.
pub struct Store {
    shards: Vec<Shard>,
    selector: RoundRobin,
    tables: RwLock<Tables>,
    aol: Option<AolWriter>,

    /// Per-entry encoded-value byte limit; ≤ 0 means unlimited.
    entry_limit: i64,

    /// Total in-memory byte budget; 0 means unlimited.
    memory_cap: u64,

    /// Mirror of `tables.total_length()`, kept for lock-free stat reads.
    memory_used: AtomicU64,

    set_count: AtomicU64,
    get_count: AtomicU64,
    remove_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("memory_used", &self.memory_used.load(Ordering::Relaxed))
            .field("persistent", &self.aol.is_some())
            .finish()
    }
}

impl Store {
    /// Opens a store against the configured database directory.
    ///
    /// Creates the directory and any missing shard files, validates every
    /// shard header against `signature`, loads persisted records, replays
    /// the change logs, and finally starts the change-log writer (when
    /// persistence is enabled).
    pub async fn open(config: &Config, signature: &str) -> Result<Store, StoreError> {
        let dir = config.dir.database.clone();
        std::fs::create_dir_all(&dir)?;

        let mut shards = Vec::with_capacity(config.meids.count);
        for index in 0..config.meids.count {
            shards.push(Shard::open(&dir, index, signature, config.meids.permission)?);
        }

        let mut store = Store {
            shards,
            selector: RoundRobin::default(),
            tables: RwLock::new(Tables::new()),
            aol: None,
            entry_limit: config.meids.size,
            memory_cap: config.memory_cap(),
            memory_used: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        };

        store.load_shards().await;
        let replayed = crate::storage::recovery::replay_logs(&store, &dir).await;
        if replayed.files > 0 {
            info!(
                files = replayed.files,
                applied = replayed.applied,
                skipped = replayed.skipped_files,
                "change log replay finished"
            );
        }

        if config.persistent.enabled {
            store.aol = Some(AolWriter::start(
                dir,
                config.backup_size_limit(),
                crate::aol::FLUSH_INTERVAL,
            ));
        }

        info!(
            shards = store.shards.len(),
            keys = store.len().await,
            "store opened"
        );
        Ok(store)
    }

    /// Rebuilds the lookup tables from whatever the shard files hold.
    ///
    /// Key files are integrity-checked; data files are taken on trust. A
    /// corrupt record stops the scan of that one file and the remaining
    /// shards still load.
    async fn load_shards(&mut self) {
        use std::collections::HashMap;

        let mut tables = self.tables.write().await;
        for shard in &self.shards {
            if !shard.active {
                continue;
            }

            let mut values: HashMap<String, Vec<u8>> = HashMap::new();
            if let Err(e) = scan_records(&shard.data_path, false, |record| {
                values.insert(record.digest.to_hex(), record.payload);
            }) {
                warn!(shard = shard.index, error = %e, "data file scan stopped early");
            }

            let mut loaded = 0usize;
            if let Err(e) = scan_records(&shard.key_path, true, |record| {
                let key = match String::from_utf8(record.payload) {
                    Ok(k) => k,
                    Err(_) => {
                        warn!(shard = shard.index, digest = %record.digest, "key record is not UTF-8, skipped");
                        return;
                    }
                };
                let hex = record.digest.to_hex();
                let Some(raw) = values.get(&hex) else {
                    warn!(shard = shard.index, key = %key, "key record has no data record, skipped");
                    return;
                };
                match decode(raw) {
                    Ok(value) => {
                        let mut meta =
                            SlotMeta::unpersisted(shard.index, record.digest, raw.len() as u32);
                        meta.position = record.position as i64;
                        tables.insert(key, meta, value);
                        loaded += 1;
                    }
                    Err(e) => {
                        warn!(shard = shard.index, key = %key, error = %e, "undecodable value record, skipped");
                    }
                }
            }) {
                warn!(shard = shard.index, error = %e, "key file scan stopped early");
            }

            if loaded > 0 {
                debug!(shard = shard.index, keys = loaded, "shard loaded");
            }
        }
        self.memory_used
            .store(tables.total_length(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------

    /// Sets a key to a value.
    ///
    /// The key is sanitized first; an empty sanitized key fails. The
    /// per-entry and total-memory caps are checked before anything
    /// changes, and the change-log enqueue happens before the tables are
    /// touched, so a refused mutation leaves no partial state.
    pub async fn set(&self, key: &str, value: Value) -> SetOutcome {
        self.apply_set(key, value, true).await
    }

    /// Replay-only variant of [`set`](Store::set): sanitization and cap
    /// checks still run, but nothing is re-logged.
    pub async fn set_unsafe(&self, key: &str, value: Value) -> SetOutcome {
        self.apply_set(key, value, false).await
    }

    async fn apply_set(&self, key: &str, value: Value, log: bool) -> SetOutcome {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let key = sanitize_key(key, false);
        if key.is_empty() {
            return SetOutcome::Failed;
        }
        let value = sanitize_value(value);

        let size = encoded_len(&value) as u64;
        if self.entry_limit > 0 && size > self.entry_limit as u64 {
            warn!(key = %key, size, limit = self.entry_limit, "value exceeds per-entry limit");
            return SetOutcome::Failed;
        }

        let mut tables = self.tables.write().await;

        let old_length = tables.slot(&key).map(|m| m.length);
        let new_length = crate::storage::tables::RECORD_OVERHEAD + size;
        if self.memory_cap > 0 {
            let projected =
                tables.total_length() - old_length.unwrap_or(0) + new_length;
            if projected > self.memory_cap {
                warn!(key = %key, projected, cap = self.memory_cap, "memory cap would be exceeded");
                return SetOutcome::Failed;
            }
        }

        if log {
            if let Some(aol) = &self.aol {
                let op = AolOp::Set {
                    key: key.clone(),
                    value: value.clone(),
                };
                if aol.enqueue(op).await.is_err() {
                    return SetOutcome::Failed;
                }
            }
        }

        let outcome = if old_length.is_some() {
            tables.replace(&key, size as u32, value);
            SetOutcome::Updated
        } else {
            let Some(shard) = self.selector.next(&self.shards) else {
                warn!(key = %key, "no active shard available");
                return SetOutcome::Failed;
            };
            let meta = SlotMeta::unpersisted(shard, digest(key.as_bytes()), size as u32);
            tables.insert(key, meta, value);
            SetOutcome::Inserted
        };

        self.memory_used
            .store(tables.total_length(), Ordering::Relaxed);
        outcome
    }

    /// Looks a key up, returning `None` when it is not live.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let key = sanitize_key(key, false);
        let tables = self.tables.read().await;
        match tables.value(&key) {
            Some(value) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// True when the key is live.
    pub async fn exist(&self, key: &str) -> bool {
        let key = sanitize_key(key, false);
        self.tables.read().await.contains(&key)
    }

    /// Removes a key. Returns false when it was not live.
    pub async fn remove(&self, key: &str) -> bool {
        self.apply_remove(key, true).await
    }

    /// Replay-only variant of [`remove`](Store::remove); nothing is
    /// re-logged.
    pub async fn remove_replayed(&self, key: &str) -> bool {
        self.apply_remove(key, false).await
    }

    async fn apply_remove(&self, key: &str, log: bool) -> bool {
        self.remove_count.fetch_add(1, Ordering::Relaxed);

        let key = sanitize_key(key, false);
        let mut tables = self.tables.write().await;
        if !tables.contains(&key) {
            return false;
        }

        if log {
            if let Some(aol) = &self.aol {
                let op = AolOp::Remove { key: key.clone() };
                if aol.enqueue(op).await.is_err() {
                    return false;
                }
            }
        }

        tables.remove(&key);
        self.memory_used
            .store(tables.total_length(), Ordering::Relaxed);
        true
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }

    /// Total shard count, active or not.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of shards still accepting keys.
    pub fn active_shard_count(&self) -> usize {
        self.shards.iter().filter(|s| s.active).count()
    }

    /// Per-shard live key counts, for the `info` command.
    pub async fn shard_key_counts(&self) -> Vec<usize> {
        let tables = self.tables.read().await;
        let mut counts = vec![0usize; self.shards.len()];
        for (_, slot) in tables.iter() {
            if let Some(count) = counts.get_mut(slot.shard) {
                *count += 1;
            }
        }
        counts
    }

    /// Snapshot of the op counters.
    pub async fn stats(&self) -> StoreStats {
        let tables = self.tables.read().await;
        StoreStats {
            keys: tables.len(),
            memory_used: self.memory_used.load(Ordering::Relaxed),
            free_slots: tables.free_len(),
            sets: self.set_count.load(Ordering::Relaxed),
            gets: self.get_count.load(Ordering::Relaxed),
            removes: self.remove_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
        }
    }

    /// In-memory byte usage (full record lengths of all live keys).
    pub fn memory_used(&self) -> u64 {
        self.memory_used.load(Ordering::Relaxed)
    }

    /// Signals the change-log writer and waits for its final drain.
    pub async fn close(&self) {
        if let Some(aol) = &self.aol {
            aol.shutdown().await;
        }
    }
}

/// Sanitizes a key: whitespace runs collapse to `_`, anything outside
/// `[A-Za-z0-9_-]` is stripped, and `trim` removes leading/trailing `_`.
pub fn sanitize_key(input: &str, trim: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_ws = false;
    for c in input.chars() {
        if c.is_whitespace() {
            pending_ws = true;
            continue;
        }
        if pending_ws {
            out.push('_');
            pending_ws = false;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        }
    }
    if pending_ws {
        out.push('_');
    }
    if trim {
        out.trim_matches('_').to_string()
    } else {
        out
    }
}

/// Value sanitization is the identity today; it exists as the hook the
/// key path already has.
pub fn sanitize_value(value: Value) -> Value {
    value
}
