//! # SnowKV
//!
//! SnowKV is an in-memory key-value store with sharded on-disk durability,
//! accessed in-process or over a line-oriented TCP shell.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                               SnowKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Shell   │───>│  Commands   │───>│    Store    │              │
//! │  │ (sessions)  │    │ (registry)  │    │  (core API) │              │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘              │
//! │                                               │                     │
//! │                        ┌──────────────────────┼─────────────┐       │
//! │                        ▼                      ▼             ▼       │
//! │                ┌──────────────┐      ┌──────────────┐  ┌─────────┐  │
//! │                │    Tables    │      │  AolWriter   │  │  Shards │  │
//! │                │  (in memory) │      │ (background) │  │ (files) │  │
//! │                └──────────────┘      └──────┬───────┘  └─────────┘  │
//! │                                             ▼                       │
//! │                                       <unix_ts>.sfb                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use snowkv::config::Config;
//! use snowkv::codec::Value;
//! use snowkv::storage::Store;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let store = Store::open(&config, "SNOWKV01").await.unwrap();
//!
//!     store.set("greeting", Value::from("hello")).await;
//!     assert_eq!(store.get("greeting").await, Some(Value::from("hello")));
//! }
//! ```
//!
//! ## Design Highlights
//!
//! ### Durability by change log
//!
//! Mutations are acknowledged once the background change-log writer
//! accepts them; the log is flushed every five seconds and replayed at
//! startup. A crash loses at most the final interval of writes and never
//! corrupts the store — a torn trailing line is ignored on replay.
//!
//! ### Sharded binary files
//!
//! Keys are spread round-robin over MessagePack-encoded shard files with
//! fixed 256-byte headers. Each shard pairs a data file with a key-index
//! file sharing the same digests, so losing one shard's files loses only
//! that shard's data.
//!
//! ### One lock, serialized mutations
//!
//! The lookup tables sit behind a single `RwLock`; writers hold it across
//! the change-log enqueue and the table update, so readers observe whole
//! mutations only and log order matches acceptance order.
//!
//! ## Module Overview
//!
//! - [`codec`]: value model, MessagePack codec, key digests
//! - [`config`]: typed configuration with validation
//! - [`storage`]: shard files, lookup tables, core API, recovery
//! - [`aol`]: the append-only change log
//! - [`server`]: the TCP shell (sessions, commands, auth, lockdown)

pub mod aol;
pub mod codec;
pub mod config;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use codec::{decode, digest, encode, Value};
pub use config::Config;
pub use server::{handle_session, ShellState, TokenFile};
pub use storage::{SetOutcome, Store};

/// The default port the TCP shell listens on.
pub const DEFAULT_CLI_PORT: u16 = 6402;

/// Version of SnowKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
