//! In-Memory Lookup Tables
//!
//! Three mappings make up the volatile state of the store:
//!
//! - `by_key`: key string → slot metadata. Presence here means the key is
//!   live.
//! - `by_digest`: lowercase-hex digest → current decoded value.
//! - `free`: slots released by deletions, kept for the future compaction
//!   path that will reuse holes in the shard files.
//!
//! The tables themselves are plain data; the store serializes every
//! mutation behind a single lock, so no entry can ever be observed in an
//! intermediate state.

use std::collections::HashMap;

use crate::codec::digest::{Digest, DIGEST_LEN};
use crate::codec::value::Value;

/// Fixed per-record overhead: digest (32) plus the size field (4).
pub const RECORD_OVERHEAD: u64 = DIGEST_LEN as u64 + 4;

/// Per-key slot metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotMeta {
    /// Index of the shard that owns this key.
    pub shard: usize,

    /// The key's digest.
    pub digest: Digest,

    /// Encoded value length in bytes.
    pub size: u32,

    /// Byte offset of the record in the key file, or −1 when the key has
    /// not been persisted to a shard file yet (compaction writes these).
    pub position: i64,

    /// Full encoded record length: digest + size field + value bytes.
    pub length: u64,
}

impl SlotMeta {
    /// Builds metadata for a freshly inserted, not-yet-persisted key.
    pub fn unpersisted(shard: usize, digest: Digest, size: u32) -> Self {
        SlotMeta {
            shard,
            digest,
            size,
            position: -1,
            length: RECORD_OVERHEAD + u64::from(size),
        }
    }
}

/// A slot released by a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub shard: usize,
    pub size: u32,
    pub position: i64,
    pub length: u64,
}

/// The volatile lookup state.
#[derive(Debug, Default)]
pub struct Tables {
    by_key: HashMap<String, SlotMeta>,
    by_digest: HashMap<String, Value>,
    free: Vec<FreeSlot>,
    total_length: u64,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a brand-new key into both tables.
    pub fn insert(&mut self, key: String, meta: SlotMeta, value: Value) {
        self.total_length += meta.length;
        self.by_digest.insert(meta.digest.to_hex(), value);
        self.by_key.insert(key, meta);
    }

    /// Replaces the value of a live key, updating its size bookkeeping.
    ///
    /// Slot placement (`shard`, `position`) is preserved; only `size` and
    /// `length` change with the new value.
    pub fn replace(&mut self, key: &str, size: u32, value: Value) -> Option<&SlotMeta> {
        let meta = self.by_key.get_mut(key)?;
        self.total_length -= meta.length;
        meta.size = size;
        meta.length = RECORD_OVERHEAD + u64::from(size);
        self.total_length += meta.length;
        self.by_digest.insert(meta.digest.to_hex(), value);
        Some(meta)
    }

    /// Removes a key from both tables, pushing its slot onto the free list.
    pub fn remove(&mut self, key: &str) -> Option<SlotMeta> {
        let meta = self.by_key.remove(key)?;
        self.total_length -= meta.length;
        self.by_digest.remove(&meta.digest.to_hex());
        self.free.push(FreeSlot {
            shard: meta.shard,
            size: meta.size,
            position: meta.position,
            length: meta.length,
        });
        Some(meta)
    }

    /// Slot metadata for a live key.
    pub fn slot(&self, key: &str) -> Option<&SlotMeta> {
        self.by_key.get(key)
    }

    /// True when the key is live.
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// The current value for a live key, resolved through its cached digest.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let meta = self.by_key.get(key)?;
        self.by_digest.get(&meta.digest.to_hex())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Sum of the full record lengths of all live keys.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of slots waiting on the free list.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Finds the smallest free slot able to hold `size` payload bytes.
    ///
    /// Sorts the list by size and binary-searches for the first fit. The
    /// slot is not removed: nothing consumes holes yet, this probe exists
    /// for the compaction path that will.
    pub fn best_fit(&mut self, size: u32) -> Option<FreeSlot> {
        if self.free.is_empty() {
            return None;
        }
        self.free.sort_by_key(|slot| slot.size);
        let idx = self.free.partition_point(|slot| slot.size < size);
        self.free.get(idx).copied()
    }

    /// Iterates over live keys and their slots.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SlotMeta)> {
        self.by_key.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::digest::digest;

    fn meta(shard: usize, key: &str, size: u32) -> SlotMeta {
        SlotMeta::unpersisted(shard, digest(key.as_bytes()), size)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut tables = Tables::new();
        tables.insert("a".to_string(), meta(0, "a", 3), Value::from("one"));

        assert!(tables.contains("a"));
        assert_eq!(tables.value("a"), Some(&Value::from("one")));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables.slot("a").unwrap().position, -1);
        assert_eq!(tables.slot("a").unwrap().length, RECORD_OVERHEAD + 3);

        let removed = tables.remove("a").unwrap();
        assert_eq!(removed.size, 3);
        assert!(!tables.contains("a"));
        assert_eq!(tables.value("a"), None);
        assert_eq!(tables.free_len(), 1);

        assert!(tables.remove("a").is_none());
        assert_eq!(tables.free_len(), 1);
    }

    #[test]
    fn test_replace_keeps_slot_placement() {
        let mut tables = Tables::new();
        let mut m = meta(2, "a", 3);
        m.position = 600;
        tables.insert("a".to_string(), m, Value::from("one"));

        tables.replace("a", 5, Value::from("three")).unwrap();
        let slot = tables.slot("a").unwrap();
        assert_eq!(slot.shard, 2);
        assert_eq!(slot.position, 600);
        assert_eq!(slot.size, 5);
        assert_eq!(slot.length, RECORD_OVERHEAD + 5);
        assert_eq!(tables.value("a"), Some(&Value::from("three")));

        assert!(tables.replace("missing", 1, Value::Nil).is_none());
    }

    #[test]
    fn test_digest_uniqueness_across_tables() {
        let mut tables = Tables::new();
        tables.insert("a".to_string(), meta(0, "a", 1), Value::Int(1));
        tables.insert("b".to_string(), meta(1, "b", 1), Value::Int(2));

        // Each by_key entry resolves to exactly its own digest's value.
        for (key, slot) in tables.iter() {
            let via_digest = tables.value(key).unwrap();
            let expected = if key == "a" { 1 } else { 2 };
            assert_eq!(via_digest, &Value::Int(expected));
            assert_eq!(slot.digest, digest(key.as_bytes()));
        }
    }

    #[test]
    fn test_total_length() {
        let mut tables = Tables::new();
        tables.insert("a".to_string(), meta(0, "a", 10), Value::Nil);
        tables.insert("b".to_string(), meta(0, "b", 20), Value::Nil);
        assert_eq!(tables.total_length(), 2 * RECORD_OVERHEAD + 30);
    }

    #[test]
    fn test_best_fit_finds_smallest_hole() {
        let mut tables = Tables::new();
        for (key, size) in [("big", 100), ("small", 8), ("mid", 40)] {
            tables.insert(key.to_string(), meta(0, key, size), Value::Nil);
            tables.remove(key);
        }

        assert_eq!(tables.best_fit(10).unwrap().size, 40);
        assert_eq!(tables.best_fit(40).unwrap().size, 40);
        assert_eq!(tables.best_fit(41).unwrap().size, 100);
        assert_eq!(tables.best_fit(101), None);
        assert_eq!(tables.best_fit(1).unwrap().size, 8);

        // The probe never consumes slots.
        assert_eq!(tables.free_len(), 3);
    }
}
