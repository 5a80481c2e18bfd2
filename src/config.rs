//! Configuration for SnowKV
//!
//! Typed configuration with defaults and validation. Parsing a config file
//! into this shape is an outer concern; every group derives `Deserialize`
//! so any serde front-end can produce it, and the server binary fills the
//! common fields from command-line flags.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by configuration validation and size parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid size string: {0:?}")]
    InvalidSize(String),

    #[error("{field} must be at least {min}")]
    BelowFloor { field: &'static str, min: u64 },

    #[error("meids.count must be at least 1")]
    NoShards,
}

/// Main configuration, grouped the way the recognized keys are grouped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dir: DirConfig,
    pub persistent: PersistentConfig,
    pub meids: MeidConfig,
    pub memory: MemoryConfig,
    pub logs: LogConfig,
}

/// Network and shell settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the HTTP face (outer concern, carried for completeness).
    pub port: u16,

    /// Port for the TCP shell.
    pub cli_port: u16,

    /// Failed logins before a subject is locked down. 0 disables lockdown.
    pub max_cli_login_attempt: u32,

    /// What a lockdown subject is keyed on.
    pub cli_lockdown: LockdownMode,

    /// Lockdown duration in seconds. Floor: 5.
    pub cli_cooldown: u64,

    /// Time a fresh connection has to authenticate, in milliseconds.
    /// Floor: 1000.
    pub cli_authentication_timeout: u64,

    /// Max accepted input line size ("64kb" style). 0 = unlimited.
    pub cli_input_size: String,

    /// Path to the JSON token file.
    pub tokens_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6401,
            cli_port: 6402,
            max_cli_login_attempt: 3,
            cli_lockdown: LockdownMode::Ip,
            cli_cooldown: 60,
            cli_authentication_timeout: 5000,
            cli_input_size: "0".to_string(),
            tokens_file: PathBuf::from("access.json"),
        }
    }
}

/// What failed logins are counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockdownMode {
    /// Count failures per source IP.
    Ip,
    /// Count failures per presented token.
    Token,
    /// Lockdown disabled.
    None,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirConfig {
    /// Directory holding shard files and change logs.
    pub database: PathBuf,

    /// Directory for log output (consumed by the subscriber setup).
    pub logs: PathBuf,
}

impl Default for DirConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./snowkv_data"),
            logs: PathBuf::from("./logs"),
        }
    }
}

/// Durability settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether mutations are written to the change log at all.
    pub enabled: bool,

    /// Change-log rotation threshold ("16mb" style). 0 = no rotation.
    pub backup_size_limit: String,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backup_size_limit: "0".to_string(),
        }
    }
}

/// Shard file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeidConfig {
    /// Reserved: at-rest encryption toggle for shard files.
    pub encrypt: bool,

    /// Unix permission bits applied to freshly created shard files.
    pub permission: u32,

    /// Number of shards. Fixed for the lifetime of a database directory.
    pub count: usize,

    /// Per-entry encoded-value byte limit. 0 or negative = unlimited.
    pub size: i64,
}

impl Default for MeidConfig {
    fn default() -> Self {
        Self {
            encrypt: false,
            permission: 0o600,
            count: 4,
            size: 0,
        }
    }
}

/// Memory accounting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Whether the memory cap is enforced at all.
    pub monitor: bool,

    /// Total in-memory value budget ("256mb" style). 0 = unlimited.
    pub max_size: String,

    /// If true a kilobyte is 1024 bytes, otherwise 1000.
    pub mb_mode: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            monitor: true,
            max_size: "0".to_string(),
            mb_mode: true,
        }
    }
}

/// Log output settings, consumed by the subscriber setup in the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub show_time: bool,
    pub time_format: String,
    pub use_colors: bool,
    pub save_cli_connections: bool,
    pub save_cli_logins: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_time: true,
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
            use_colors: true,
            save_cli_connections: true,
            save_cli_logins: true,
        }
    }
}

impl Config {
    /// Checks the floors the shell and store rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meids.count == 0 {
            return Err(ConfigError::NoShards);
        }
        if self.server.cli_cooldown < 5 {
            return Err(ConfigError::BelowFloor {
                field: "server.cli_cooldown",
                min: 5,
            });
        }
        if self.server.cli_authentication_timeout < 1000 {
            return Err(ConfigError::BelowFloor {
                field: "server.cli_authentication_timeout",
                min: 1000,
            });
        }
        // Surface bad size strings at startup rather than first use.
        parse_size(&self.server.cli_input_size, self.memory.mb_mode)?;
        parse_size(&self.persistent.backup_size_limit, self.memory.mb_mode)?;
        parse_size(&self.memory.max_size, self.memory.mb_mode)?;
        Ok(())
    }

    /// Resolved input line limit in bytes. 0 = unlimited.
    pub fn max_input_size(&self) -> u64 {
        parse_size(&self.server.cli_input_size, self.memory.mb_mode).unwrap_or(0)
    }

    /// Resolved change-log rotation threshold in bytes. 0 = no rotation.
    pub fn backup_size_limit(&self) -> u64 {
        parse_size(&self.persistent.backup_size_limit, self.memory.mb_mode).unwrap_or(0)
    }

    /// Resolved memory cap in bytes. 0 = unlimited (also when the monitor
    /// is switched off).
    pub fn memory_cap(&self) -> u64 {
        if !self.memory.monitor {
            return 0;
        }
        parse_size(&self.memory.max_size, self.memory.mb_mode).unwrap_or(0)
    }
}

/// Parses a byte-size string like `"512"`, `"64kb"`, `"2mb"`, `"1gb"`.
///
/// `mb_mode` selects the kilobyte: 1024 bytes when true, 1000 otherwise.
/// Bare numbers are bytes. The empty string and `"0"` both mean zero.
pub fn parse_size(s: &str, mb_mode: bool) -> Result<u64, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }

    let lower = s.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix("gb") {
        (stripped, kilo(mb_mode).pow(3))
    } else if let Some(stripped) = lower.strip_suffix("mb") {
        (stripped, kilo(mb_mode).pow(2))
    } else if let Some(stripped) = lower.strip_suffix("kb") {
        (stripped, kilo(mb_mode))
    } else if let Some(stripped) = lower.strip_suffix('b') {
        (stripped, 1)
    } else {
        (lower.as_str(), 1)
    };

    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| ConfigError::InvalidSize(s.to_string()))
}

fn kilo(mb_mode: bool) -> u64 {
    if mb_mode {
        1024
    } else {
        1000
    }
}
