//! TCP Shell Module
//!
//! The human-and-program-facing side of SnowKV: a line-oriented shell over
//! raw TCP with token authentication, per-subject lockdown, and two output
//! modes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                      (main.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() → spawn
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Session                               │
//! │                                                             │
//! │  AWAIT_AUTH ── tokens + lockdown ──> READY                  │
//! │                                        │                    │
//! │                              ┌─────────▼─────────┐          │
//! │                              │ commands registry │          │
//! │                              └─────────┬─────────┘          │
//! │                                        ▼                    │
//! │                                      Store                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `session`: the per-connection state machine
//! - `commands`: tokenizer, registry, and command executors
//! - `response`: status codes, JSON envelope, echo rendering
//! - `tokens`: the access-token table
//! - `lockdown`: failed-login throttling with its sidecar file

pub mod commands;
pub mod lockdown;
pub mod response;
pub mod session;
pub mod tokens;

// Re-export commonly used types for convenience
pub use commands::{parse, tokenize, CommandHandler, Parsed};
pub use lockdown::LockdownTracker;
pub use response::{Reply, Status};
pub use session::{handle_session, ShellState, ShellStats};
pub use tokens::{TokenFile, TokenInfo};
