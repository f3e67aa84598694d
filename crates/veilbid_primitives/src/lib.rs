#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions
)]

//! Veilbid primitives: hashing, canonical encodings and time helpers.
//
// This crate implements the utilities shared by the token, ledger and auction crates:
//
// - SHA-256 digests and hex rendering
// - Canonical (sorted-key, compact) JSON hashing for ledger blocks
// - Standard-alphabet base64 and fixed-width big-endian framing (I2OSP)
// - Constant-time equality for digests
// - RFC 3339 timestamps in UTC

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::Path;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// 32-byte hash (SHA-256 output).
pub type Hash256 = [u8; 32];

pub mod constants;

#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("value of {got} bytes does not fit in {width}")]
    Overflow { width: usize, got: usize },
}

/// Plain SHA-256.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Domain-tagged SHA-256: `SHA256( UTF8(tag) || Σ parts )`.
#[must_use]
pub fn h_tag(tag: &str, parts: &[&[u8]]) -> Hash256 {
    debug_assert!(
        tag.starts_with("veilbid."),
        "non-veilbid.* tag used in protocol hashing: {tag}"
    );
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for p in parts {
        hasher.update(p);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Canonical JSON bytes: compact separators, object keys in sorted order.
///
/// Keys are sorted here rather than trusting the map order of `Value`, which
/// changes when any crate in the build enables `serde_json/preserve_order`.
#[must_use]
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(item, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

/// Hex SHA-256 over the canonical JSON rendering of `value`.
#[must_use]
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(&canonical_json(value))
}

#[must_use]
pub fn b64e(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64d(s: &str) -> Result<Vec<u8>, PrimitiveError> {
    Ok(STANDARD.decode(s.trim())?)
}

/// Left-pad big-endian bytes to exactly `width` bytes (I2OSP).
pub fn i2osp(be: &[u8], width: usize) -> Result<Vec<u8>, PrimitiveError> {
    // Strip redundant leading zeros before measuring.
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
    let significant = &be[first..];
    if significant.len() > width {
        return Err(PrimitiveError::Overflow { width, got: significant.len() });
    }
    let mut out = vec![0u8; width - significant.len()];
    out.extend_from_slice(significant);
    Ok(out)
}

/// Constant-time equality for two 32-byte hashes.
#[must_use]
pub fn ct_eq_hash(a: &Hash256, b: &Hash256) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time equality over byte strings (length mismatch is unequal).
#[must_use]
pub fn ct_eq_bytes(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// RFC 3339 with microsecond precision and a `Z` suffix.
#[must_use]
pub fn to_iso(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[must_use]
pub fn now_iso() -> String {
    to_iso(&now_utc())
}

pub fn parse_iso(s: &str) -> Result<DateTime<Utc>, PrimitiveError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Full-rewrite file update: write a sibling temp file, flush, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let mut file = std::fs::File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(tmp, path)
}
