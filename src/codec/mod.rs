//! Binary Codec Module
//!
//! This module implements the value model and wire codec for SnowKV.
//! Values are encoded in the MessagePack format so that the on-disk shard
//! files stay readable by any MessagePack implementation.
//!
//! ## Overview
//!
//! ```text
//! Value tree                      byte stream
//! ┌──────────────┐   encode()   ┌──────────────┐
//! │ Map          │ ───────────> │ 82 a3 6b 65..│
//! │  ├ "key": 1  │ <─────────── │              │
//! │  └ "ok": true│   decode()   └──────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `value`: The `Value` enum and JSON bridging
//! - `encode`: MessagePack encoder
//! - `decode`: MessagePack decoder with typed errors
//! - `digest`: SHA-256 key digests

pub mod decode;
pub mod digest;
pub mod encode;
pub mod value;

// Re-export commonly used types for convenience
pub use decode::{decode, DecodeError};
pub use digest::{digest, Digest};
pub use encode::{encode, encoded_len};
pub use value::Value;
