//! Shard File Format
//!
//! Each shard owns two on-disk artifacts sharing one index: a data file
//! (`meid-<i>.sfd`) holding encoded values and a key file (`key-<i>.sfk`)
//! holding the plaintext key bytes. Both start with the same fixed header.
//!
//! ## Header (exactly 256 bytes)
//!
//! ```text
//! ┌────────┬──────┬───────────────────────────────────────────┐
//! │ Offset │ Size │ Field                                     │
//! ├────────┼──────┼───────────────────────────────────────────┤
//! │ 0      │ 2    │ version (big-endian u16, current = 1)     │
//! │ 2      │ 8    │ signature (8 ASCII bytes)                 │
//! │ 10     │ 118  │ reserved, zero                            │
//! │ 128    │ 8    │ timestamp (big-endian u64, unix seconds)  │
//! │ 136    │ 120  │ reserved, zero                            │
//! └────────┴──────┴───────────────────────────────────────────┘
//! ```
//!
//! Validation compares only the first 128 bytes against a reference header,
//! so the write timestamp never participates in the match.
//!
//! ## Records (repeating from offset 256)
//!
//! ```text
//! digest(32) ‖ size(4, big-endian u32) ‖ payload(size)
//! ```
//!
//! In a key file the payload is the key bytes and `SHA256(payload)` must
//! equal the declared digest; in a data file the payload is the encoded
//! value and the digest is taken on trust.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

use crate::codec::digest::{digest, Digest, DIGEST_LEN};

/// Exact size of a shard file header.
pub const HEADER_LEN: u64 = 256;

/// Current file format version.
pub const FORMAT_VERSION: u16 = 1;

/// Length of the deployment signature inside the header.
pub const SIGNATURE_LEN: usize = 8;

/// How many leading header bytes participate in validation.
const VALIDATED_PREFIX: usize = 128;

/// Errors raised by the shard file layer.
#[derive(Debug, Error)]
pub enum MeidError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: header is shorter than {HEADER_LEN} bytes")]
    ShortHeader { path: PathBuf },

    #[error("{path}: header does not match this deployment's signature/version")]
    HeaderMismatch { path: PathBuf },

    #[error("{path}: corrupt record at offset {position}: {reason}")]
    CorruptRecord {
        path: PathBuf,
        position: u64,
        reason: String,
    },
}

/// A record yielded by [`scan_records`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The 32-byte key digest.
    pub digest: Digest,

    /// The record payload (key bytes or encoded value).
    pub payload: Vec<u8>,

    /// Byte offset of the record start within the file.
    pub position: u64,
}

/// Builds a fresh 256-byte header for this deployment.
///
/// The signature is truncated or zero-padded to exactly 8 bytes.
pub fn build_header(signature: &str) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..2].copy_from_slice(&FORMAT_VERSION.to_be_bytes());

    let sig = signature.as_bytes();
    let n = sig.len().min(SIGNATURE_LEN);
    header[2..2 + n].copy_from_slice(&sig[..n]);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    header[128..136].copy_from_slice(&now.to_be_bytes());
    header
}

/// Checks a header read from disk against this deployment.
///
/// Only bytes `0..128` are compared, which covers version, signature, and
/// the reserved zeros but not the write timestamp.
pub fn validate_header(buf: &[u8], signature: &str, path: &Path) -> Result<(), MeidError> {
    if buf.len() < HEADER_LEN as usize {
        return Err(MeidError::ShortHeader {
            path: path.to_path_buf(),
        });
    }
    let reference = build_header(signature);
    if buf[..VALIDATED_PREFIX] != reference[..VALIDATED_PREFIX] {
        return Err(MeidError::HeaderMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Writes a fresh header at the start of `w`.
pub fn write_header<W: Write>(w: &mut W, signature: &str) -> Result<(), MeidError> {
    w.write_all(&build_header(signature))?;
    Ok(())
}

/// Appends one record (`digest ‖ size ‖ payload`) to `w`.
pub fn write_record<W: Write>(w: &mut W, digest: &Digest, payload: &[u8]) -> Result<(), MeidError> {
    w.write_all(digest.as_bytes())?;
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    Ok(())
}

/// Scans every record in a shard file, in file order.
///
/// `verify` enables the key-file integrity check (`SHA256(payload)` must
/// match the declared digest). Scanning stops at the first malformed or
/// short record with [`MeidError::CorruptRecord`]; a clean EOF on a record
/// boundary ends the scan normally.
pub fn scan_records<F>(path: &Path, verify: bool, mut on_record: F) -> Result<(), MeidError>
where
    F: FnMut(Record),
{
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(HEADER_LEN))?;

    let mut position = HEADER_LEN;
    loop {
        let mut raw_digest = [0u8; DIGEST_LEN];
        match reader.read_exact(&mut raw_digest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(MeidError::Io(e)),
        }

        let size = reader
            .read_u32::<BigEndian>()
            .map_err(|_| MeidError::CorruptRecord {
                path: path.to_path_buf(),
                position,
                reason: "record header extends past end of file".to_string(),
            })?;

        let mut payload = vec![0u8; size as usize];
        reader
            .read_exact(&mut payload)
            .map_err(|_| MeidError::CorruptRecord {
                path: path.to_path_buf(),
                position,
                reason: format!("payload of {} bytes extends past end of file", size),
            })?;

        let declared = Digest(raw_digest);
        if verify && digest(&payload) != declared {
            return Err(MeidError::CorruptRecord {
                path: path.to_path_buf(),
                position,
                reason: "payload digest does not match declared digest".to_string(),
            });
        }

        on_record(Record {
            digest: declared,
            payload,
            position,
        });
        position += DIGEST_LEN as u64 + 4 + size as u64;
    }
}

/// One shard: a data/key file pair addressed by integer index.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Shard index, 0-based.
    pub index: usize,

    /// Path of the data file (`meid-<i>.sfd`).
    pub data_path: PathBuf,

    /// Path of the key file (`key-<i>.sfk`).
    pub key_path: PathBuf,

    /// False when the shard was sidelined by a faint-file header mismatch.
    /// Inactive shards receive no new keys.
    pub active: bool,
}

impl Shard {
    /// Opens (or creates) a shard's file pair under `dir`.
    ///
    /// A missing file is created with a fresh header and the configured
    /// permission bits. A header mismatch on a file that already holds
    /// records ("ready") is fatal; a mismatch on a header-only file
    /// ("faint") deactivates the shard and startup continues.
    pub fn open(
        dir: &Path,
        index: usize,
        signature: &str,
        permission: u32,
    ) -> Result<Shard, MeidError> {
        let data_path = dir.join(format!("meid-{}.sfd", index));
        let key_path = dir.join(format!("key-{}.sfk", index));

        let mut active = true;
        for path in [&data_path, &key_path] {
            match open_or_create(path, signature, permission)? {
                HeaderState::Valid => {}
                HeaderState::FaintMismatch => {
                    warn!(shard = index, path = %path.display(), "faint shard file header mismatch, shard marked inactive");
                    active = false;
                }
            }
        }

        Ok(Shard {
            index,
            data_path,
            key_path,
            active,
        })
    }
}

enum HeaderState {
    Valid,
    FaintMismatch,
}

fn open_or_create(path: &Path, signature: &str, permission: u32) -> Result<HeaderState, MeidError> {
    if !path.exists() {
        let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
        set_permission(&file, permission)?;
        write_header(&mut file, signature)?;
        file.sync_all()?;
        return Ok(HeaderState::Valid);
    }

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut header = vec![0u8; HEADER_LEN as usize];
    let short = file.read_exact(&mut header).is_err();

    let outcome = if short {
        Err(MeidError::ShortHeader {
            path: path.to_path_buf(),
        })
    } else {
        validate_header(&header, signature, path)
    };

    match outcome {
        Ok(()) => Ok(HeaderState::Valid),
        // A file holding records is load-bearing: refuse to run against it.
        Err(e) if len > HEADER_LEN => Err(e),
        Err(_) => Ok(HeaderState::FaintMismatch),
    }
}

#[cfg(unix)]
fn set_permission(file: &File, permission: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(permission))
}

#[cfg(not(unix))]
fn set_permission(_file: &File, _permission: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SIG: &str = "SNOWKV01";

    #[test]
    fn test_header_layout() {
        let header = build_header(SIG);
        assert_eq!(header.len(), 256);
        assert_eq!(&header[0..2], &[0, 1]);
        assert_eq!(&header[2..10], b"SNOWKV01");
        assert!(header[10..128].iter().all(|&b| b == 0));
        assert!(header[136..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_ignores_timestamp() {
        let mut header = build_header(SIG).to_vec();
        // Stomp the timestamp field; validation must still pass.
        header[128..136].copy_from_slice(&[0xff; 8]);
        validate_header(&header, SIG, Path::new("x")).unwrap();
    }

    #[test]
    fn test_validate_rejects_wrong_signature_and_version() {
        let header = build_header("OTHERSIG").to_vec();
        assert!(matches!(
            validate_header(&header, SIG, Path::new("x")),
            Err(MeidError::HeaderMismatch { .. })
        ));

        let mut header = build_header(SIG).to_vec();
        header[1] = 9;
        assert!(validate_header(&header, SIG, Path::new("x")).is_err());

        assert!(matches!(
            validate_header(&[0u8; 10], SIG, Path::new("x")),
            Err(MeidError::ShortHeader { .. })
        ));
    }

    #[test]
    fn test_record_round_trip_with_verification() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key-0.sfk");

        let keys: Vec<&[u8]> = vec![b"alpha", b"beta", b"gamma"];
        {
            let mut file = File::create(&path).unwrap();
            write_header(&mut file, SIG).unwrap();
            for key in &keys {
                write_record(&mut file, &digest(key), key).unwrap();
            }
        }

        let mut seen = Vec::new();
        scan_records(&path, true, |record| seen.push(record)).unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].payload, b"alpha");
        assert_eq!(seen[0].position, HEADER_LEN);
        assert_eq!(seen[1].position, HEADER_LEN + 32 + 4 + 5);
        assert_eq!(seen[2].digest, digest(b"gamma"));
    }

    #[test]
    fn test_scan_detects_digest_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key-0.sfk");

        {
            let mut file = File::create(&path).unwrap();
            write_header(&mut file, SIG).unwrap();
            // Declared digest belongs to different bytes than the payload.
            write_record(&mut file, &digest(b"other"), b"alpha").unwrap();
        }

        let err = scan_records(&path, true, |_| {}).unwrap_err();
        assert!(matches!(err, MeidError::CorruptRecord { .. }));

        // Without verification the same file scans cleanly (data files).
        let mut count = 0;
        scan_records(&path, false, |_| count += 1).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_scan_detects_truncated_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meid-0.sfd");

        {
            let mut file = File::create(&path).unwrap();
            write_header(&mut file, SIG).unwrap();
            write_record(&mut file, &digest(b"k"), b"payload").unwrap();
        }
        // Chop the tail off the last record.
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let err = scan_records(&path, false, |_| {}).unwrap_err();
        assert!(matches!(err, MeidError::CorruptRecord { .. }));
    }

    #[test]
    fn test_shard_open_creates_pair() {
        let dir = tempdir().unwrap();
        let shard = Shard::open(dir.path(), 2, SIG, 0o600).unwrap();

        assert!(shard.active);
        assert!(shard.data_path.ends_with("meid-2.sfd"));
        assert!(shard.key_path.ends_with("key-2.sfk"));
        assert_eq!(fs::metadata(&shard.data_path).unwrap().len(), HEADER_LEN);
        assert_eq!(fs::metadata(&shard.key_path).unwrap().len(), HEADER_LEN);

        // Reopening against the same signature keeps the shard active.
        let again = Shard::open(dir.path(), 2, SIG, 0o600).unwrap();
        assert!(again.active);
    }

    #[test]
    fn test_faint_mismatch_deactivates_ready_mismatch_aborts() {
        let dir = tempdir().unwrap();

        // Header-only file written by some other deployment: faint.
        Shard::open(dir.path(), 0, "OTHERSIG", 0o600).unwrap();
        let shard = Shard::open(dir.path(), 0, SIG, 0o600).unwrap();
        assert!(!shard.active);

        // Same situation but the data file holds a record: fatal.
        let other = tempdir().unwrap();
        Shard::open(other.path(), 0, "OTHERSIG", 0o600).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(other.path().join("meid-0.sfd"))
                .unwrap();
            write_record(&mut file, &digest(b"k"), b"v").unwrap();
        }
        assert!(Shard::open(other.path(), 0, SIG, 0o600).is_err());
    }
}
