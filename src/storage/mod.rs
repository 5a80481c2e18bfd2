//! Storage Engine Module
//!
//! The durable half of SnowKV: sharded binary files on disk, volatile
//! lookup tables in memory, and the recovery path that ties the two
//! together at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │                                                              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────────────────┐   │
//! │  │   Tables    │   │ RoundRobin  │   │  AolWriter task   │   │
//! │  │ by_key      │   │  selector   │   │  (aol module)     │   │
//! │  │ by_digest   │   └─────────────┘   └───────────────────┘   │
//! │  │ free list   │                                             │
//! │  └─────────────┘                                             │
//! └───────┬──────────────────────────────────────────────────────┘
//!         │ startup only
//!         ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ meid-0.sfd   │  │ key-0.sfk    │  │ <ts>.sfb     │
//! │ meid-1.sfd   │  │ key-1.sfk    │  │ <ts>.sfb     │
//! │ …            │  │ …            │  │ …            │
//! └──────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `meid`: the shard file format (headers, records, scan)
//! - `tables`: the in-memory lookup tables and free list
//! - `store`: the core API (`set`/`get`/`remove`/`exist`) and caps
//! - `recovery`: ordered change-log replay at startup

pub mod meid;
pub mod recovery;
pub mod store;
pub mod tables;

// Re-export commonly used types for convenience
pub use meid::{MeidError, Shard};
pub use recovery::{replay_logs, ReplaySummary};
pub use store::{sanitize_key, sanitize_value, SetOutcome, Store, StoreError, StoreStats};
pub use tables::{FreeSlot, SlotMeta, Tables};
