//! Access Tokens
//!
//! The token file is a small JSON document mapping access tokens to their
//! grants, plus the deployment signature stamped into every shard header:
//!
//! ```json
//! {
//!   "signature": "SNOWKV01",
//!   "meid_version": 1,
//!   "access_keys": {
//!     "s3cret": { "alias": "ops", "permissions": ["*"], "max_connections": 4 }
//!   }
//! }
//! ```
//!
//! A missing file yields the built-in table: the blank token with alias
//! `admin` and unlimited connections, which is what a fresh deployment's
//! first shell login expects.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors raised while loading the token file.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed token file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One token's grants.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenInfo {
    /// Short name shown in the prompt and logs.
    pub alias: String,

    /// Permission strings (opaque to the shell today).
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Concurrent session cap for this token; −1 means unlimited.
    #[serde(default = "default_max_connections")]
    pub max_connections: i64,
}

fn default_max_connections() -> i64 {
    -1
}

/// The parsed token file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenFile {
    /// 8-character deployment signature for shard headers.
    pub signature: String,

    /// Shard format version this deployment expects.
    #[serde(default = "default_meid_version")]
    pub meid_version: u16,

    /// Token → grants.
    #[serde(default)]
    pub access_keys: HashMap<String, TokenInfo>,
}

fn default_meid_version() -> u16 {
    1
}

impl Default for TokenFile {
    fn default() -> Self {
        let mut access_keys = HashMap::new();
        access_keys.insert(
            String::new(),
            TokenInfo {
                alias: "admin".to_string(),
                permissions: vec!["*".to_string()],
                max_connections: -1,
            },
        );
        TokenFile {
            signature: "SNOWKV01".to_string(),
            meid_version: 1,
            access_keys,
        }
    }
}

impl TokenFile {
    /// Loads the token file, falling back to the built-in table when the
    /// file does not exist. A file that exists but fails to parse is an
    /// error: running with the wrong tokens is worse than not starting.
    pub fn load(path: &Path) -> Result<TokenFile, TokenError> {
        if !path.exists() {
            info!(path = %path.display(), "no token file, using built-in blank token");
            return Ok(TokenFile::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Looks up the grants for a presented token.
    pub fn lookup(&self, token: &str) -> Option<&TokenInfo> {
        self.access_keys.get(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_blank_token() {
        let dir = tempdir().unwrap();
        let tokens = TokenFile::load(&dir.path().join("absent.json")).unwrap();
        let info = tokens.lookup("").unwrap();
        assert_eq!(info.alias, "admin");
        assert_eq!(info.max_connections, -1);
        assert_eq!(tokens.signature, "SNOWKV01");
    }

    #[test]
    fn test_parse_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.json");
        std::fs::write(
            &path,
            r#"{
                "signature": "DEPLOY01",
                "meid_version": 1,
                "access_keys": {
                    "s3cret": { "alias": "ops", "permissions": ["*"], "max_connections": 2 },
                    "viewer": { "alias": "ro" }
                }
            }"#,
        )
        .unwrap();

        let tokens = TokenFile::load(&path).unwrap();
        assert_eq!(tokens.signature, "DEPLOY01");
        assert_eq!(tokens.lookup("s3cret").unwrap().max_connections, 2);
        // Omitted fields take their defaults.
        let ro = tokens.lookup("viewer").unwrap();
        assert_eq!(ro.max_connections, -1);
        assert!(ro.permissions.is_empty());
        assert!(tokens.lookup("nope").is_none());
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TokenFile::load(&path),
            Err(TokenError::Malformed(_))
        ));
    }
}
