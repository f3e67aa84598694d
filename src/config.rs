//! Node and authority configuration. Every field has a default, so an empty
//! JSON object (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use veilbid_auction::PeerSettings;
use veilbid_primitives::constants::{
    CLOSING_CHECK_INTERVAL_SECS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_TIMESTAMP_SKEW_SECS,
};

use crate::errors::NodeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Where `ledger.json`, `wallet.json`, `auction_keys.json` and
    /// `settlements.json` live. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub max_batch_size: usize,
    pub max_timestamp_skew_secs: i64,
    pub closing_check_interval_ms: u64,
    pub recv_timeout_ms: u64,
    pub authority_timeout_ms: u64,
    pub rsa_bits: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_timestamp_skew_secs: DEFAULT_MAX_TIMESTAMP_SKEW_SECS,
            closing_check_interval_ms: CLOSING_CHECK_INTERVAL_SECS * 1_000,
            recv_timeout_ms: 250,
            authority_timeout_ms: 5_000,
            rsa_bits: 2048,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub const fn peer_settings(&self) -> PeerSettings {
        PeerSettings {
            max_batch_size: self.max_batch_size,
            rsa_bits: self.rsa_bits,
            max_timestamp_skew_secs: self.max_timestamp_skew_secs,
        }
    }

    #[must_use]
    pub const fn closing_check_interval(&self) -> Duration {
        Duration::from_millis(self.closing_check_interval_ms)
    }

    #[must_use]
    pub const fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    #[must_use]
    pub const fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub rsa_bits: usize,
    /// Tokens granted to every newly registered member.
    pub initial_quota: u32,
    pub certificate_validity_days: i64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self { rsa_bits: 2048, initial_quota: 100, certificate_validity_days: 180 }
    }
}
