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
    clippy::multiple_crate_versions,
    clippy::result_large_err
)]

//! Veilbid ledger: append-only hash-chained event blocks.
//!
//! Every accepted auction message is appended as a JSON event. Blocks link by
//! `prev_hash` and carry a SHA-256 over their canonical (sorted-key, compact)
//! JSON. Peers converge by adopting a strictly longer remote chain once it
//! verifies end to end.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use veilbid_primitives::{constants, ct_eq_bytes, hash_canonical, now_iso, write_atomic};

/// One immutable block of events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub prev_hash: String,
    pub timestamp: String,
    pub events: Vec<Value>,
    pub block_hash: String,
}

impl Block {
    /// Hash over every field except `block_hash`.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        hash_canonical(&json!({
            "height": self.height,
            "prev_hash": self.prev_hash,
            "timestamp": self.timestamp,
            "events": self.events,
        }))
    }

    #[must_use]
    pub fn seal(height: u64, prev_hash: String, timestamp: String, events: Vec<Value>) -> Self {
        let mut block = Self { height, prev_hash, timestamp, events, block_hash: String::new() };
        block.block_hash = block.compute_hash();
        block
    }

    #[must_use]
    pub fn genesis(timestamp: String) -> Self {
        Self::seal(
            constants::GENESIS_HEIGHT,
            constants::GENESIS_PREV_HASH.to_owned(),
            timestamp,
            vec![genesis_event()],
        )
    }

    fn is_genesis_shaped(&self) -> bool {
        self.height == constants::GENESIS_HEIGHT
            && self.prev_hash == constants::GENESIS_PREV_HASH
            && self.events == [genesis_event()]
    }
}

#[must_use]
pub fn genesis_event() -> Value {
    json!({"type": constants::GENESIS_EVENT_TYPE, "description": constants::GENESIS_DESCRIPTION})
}

/// Token id carried by an event, if any.
#[must_use]
pub fn event_token_id(event: &Value) -> Option<&str> {
    event.get("token")?.get("token_id")?.as_str()
}

#[must_use]
pub fn event_type(event: &Value) -> Option<&str> {
    event.get("type")?.as_str()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    Empty,
    GenesisInvalid,
    HeightMismatch,
    PrevHashMismatch,
    HashMismatch,
}

/// First integrity failure found while walking a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("chain fault at height {height}: {reason:?}")]
pub struct ChainFault {
    pub height: u64,
    pub reason: FaultReason,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Fault(#[from] ChainFault),
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Buffered { pending: usize },
    BlockCreated { height: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainChoice {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    KeptLocal,
    Replaced { height: u64 },
}

/// Verify genesis, height continuity, hash linkage and recomputed hashes.
pub fn verify_chain(chain: &[Block]) -> Result<(), ChainFault> {
    let Some(genesis) = chain.first() else {
        return Err(ChainFault { height: 0, reason: FaultReason::Empty });
    };
    // 1) Genesis shape and self-hash
    if !genesis.is_genesis_shaped() {
        return Err(ChainFault { height: genesis.height, reason: FaultReason::GenesisInvalid });
    }
    if !ct_eq_bytes(genesis.compute_hash().as_bytes(), genesis.block_hash.as_bytes()) {
        return Err(ChainFault { height: genesis.height, reason: FaultReason::HashMismatch });
    }
    for pair in chain.windows(2) {
        let (prev, block) = (&pair[0], &pair[1]);
        // 2) Height progression
        if block.height != prev.height + 1 {
            return Err(ChainFault { height: block.height, reason: FaultReason::HeightMismatch });
        }
        // 3) Linkage
        if !ct_eq_bytes(block.prev_hash.as_bytes(), prev.block_hash.as_bytes()) {
            return Err(ChainFault { height: block.height, reason: FaultReason::PrevHashMismatch });
        }
        // 4) Recomputed hash
        if !ct_eq_bytes(block.compute_hash().as_bytes(), block.block_hash.as_bytes()) {
            return Err(ChainFault { height: block.height, reason: FaultReason::HashMismatch });
        }
    }
    Ok(())
}

/// Longest chain wins; ties keep the local chain.
#[must_use]
pub const fn compare(local: &[Block], remote: &[Block]) -> ChainChoice {
    if remote.len() > local.len() {
        ChainChoice::Remote
    } else {
        ChainChoice::Local
    }
}

/// Reads a chain snapshot. Missing, empty, corrupt or unverifiable files all
/// read as "no ledger".
#[must_use]
pub fn load_from_file(path: &Path) -> Option<Vec<Block>> {
    let bytes = std::fs::read(path).ok()?;
    let chain: Vec<Block> = match serde_json::from_slice(&bytes) {
        Ok(chain) => chain,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ledger file unreadable, ignoring");
            return None;
        }
    };
    if let Err(fault) = verify_chain(&chain) {
        warn!(path = %path.display(), %fault, "ledger file fails verification, ignoring");
        return None;
    }
    Some(chain)
}

pub fn save_to_file(path: &Path, chain: &[Block]) -> Result<(), LedgerError> {
    write_atomic(path, &serde_json::to_vec_pretty(chain)?)?;
    Ok(())
}

/// A peer's ledger: the verified chain plus not-yet-sealed events.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Value>,
    max_batch_size: usize,
    path: Option<PathBuf>,
}

impl Ledger {
    /// Fresh in-memory ledger holding only a genesis block.
    #[must_use]
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            chain: vec![Block::genesis(now_iso())],
            pending: Vec::new(),
            max_batch_size: max_batch_size.max(1),
            path: None,
        }
    }

    /// Loads `path` or, if it holds no usable ledger, starts a fresh one there.
    pub fn open(path: impl AsRef<Path>, max_batch_size: usize) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Self::new(max_batch_size);
        if let Some(chain) = load_from_file(&path) {
            debug!(blocks = chain.len(), "ledger loaded");
            ledger.chain = chain;
        }
        ledger.path = Some(path);
        ledger.persist()?;
        Ok(ledger)
    }

    pub fn from_chain(chain: Vec<Block>, max_batch_size: usize) -> Result<Self, ChainFault> {
        verify_chain(&chain)?;
        Ok(Self { chain, pending: Vec::new(), max_batch_size: max_batch_size.max(1), path: None })
    }

    #[must_use]
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    #[must_use]
    pub fn pending(&self) -> &[Value] {
        &self.pending
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[must_use]
    pub fn tip(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Buffers `event`, sealing a block once the buffer reaches the batch size.
    pub fn add_action(&mut self, event: Value) -> Result<Append, LedgerError> {
        self.pending.push(event);
        if self.pending.len() < self.max_batch_size {
            return Ok(Append::Buffered { pending: self.pending.len() });
        }
        let height = self.seal_pending()?;
        Ok(Append::BlockCreated { height })
    }

    /// Seals whatever is pending into a new block. Returns the tip height.
    pub fn seal_pending(&mut self) -> Result<u64, LedgerError> {
        let Some(tip) = self.chain.last() else {
            return Err(ChainFault { height: 0, reason: FaultReason::Empty }.into());
        };
        if self.pending.is_empty() {
            return Ok(tip.height);
        }
        let block = Block::seal(
            tip.height + 1,
            tip.block_hash.clone(),
            now_iso(),
            std::mem::take(&mut self.pending),
        );
        let height = block.height;
        self.chain.push(block);
        self.persist()?;
        debug!(height, "block sealed");
        Ok(height)
    }

    pub fn verify_chain(&self) -> Result<(), ChainFault> {
        verify_chain(&self.chain)
    }

    /// Adopts `remote` only when it is strictly longer and verifies. Pending
    /// events whose tokens the remote chain already holds are dropped.
    pub fn merge_remote(&mut self, remote: Vec<Block>) -> Result<MergeOutcome, LedgerError> {
        if compare(&self.chain, &remote) == ChainChoice::Local {
            return Ok(MergeOutcome::KeptLocal);
        }
        verify_chain(&remote)?;

        let adopted: HashSet<&str> =
            remote.iter().flat_map(|b| b.events.iter()).filter_map(event_token_id).collect();
        let before = self.pending.len();
        self.pending.retain(|e| !event_token_id(e).is_some_and(|t| adopted.contains(t)));
        let dropped = before - self.pending.len();

        let height = remote.last().map_or(0, |b| b.height);
        self.chain = remote;
        self.persist()?;
        info!(height, dropped_pending = dropped, "adopted longer remote chain");
        Ok(MergeOutcome::Replaced { height })
    }

    /// Every non-genesis event, chain first, then the pending buffer.
    pub fn events(&self) -> impl Iterator<Item = &Value> {
        self.chain.iter().skip(1).flat_map(|b| b.events.iter()).chain(self.pending.iter())
    }

    #[must_use]
    pub fn token_used(&self, token_id: &str) -> bool {
        self.events().any(|e| event_token_id(e) == Some(token_id))
    }

    #[must_use]
    pub fn find_token_signature(&self, token_id: &str) -> Option<&str> {
        self.events()
            .find(|e| event_token_id(e) == Some(token_id))
            .and_then(|e| e.get("token")?.get("token_sig")?.as_str())
    }

    #[must_use]
    pub fn find_auction(&self, auction_id: u64) -> Option<&Value> {
        self.events().find(|e| {
            event_type(e) == Some(constants::MSG_AUCTION)
                && e.get("id").and_then(Value::as_u64) == Some(auction_id)
        })
    }

    #[must_use]
    pub fn find_auction_public_key(&self, auction_id: u64) -> Option<&str> {
        self.find_auction(auction_id)?.get("public_key")?.as_str()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        match &self.path {
            Some(path) => save_to_file(path, &self.chain),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, id: u64, token: &str) -> Value {
        json!({"type": kind, "id": id, "public_key": format!("pk-{id}"),
               "token": {"token_id": token, "token_sig": format!("sig-{token}")}})
    }

    #[test]
    fn genesis_only_chain_verifies() {
        let ledger = Ledger::new(1);
        assert_eq!(ledger.len(), 1);
        ledger.verify_chain().unwrap();
        assert_eq!(ledger.events().count(), 0);
    }

    #[test]
    fn batching_buffers_until_full() {
        let mut ledger = Ledger::new(2);
        assert_eq!(ledger.add_action(event("auction", 1, "t1")).unwrap(), Append::Buffered { pending: 1 });
        assert!(ledger.token_used("t1"));
        assert_eq!(ledger.add_action(event("bid", 1, "t2")).unwrap(), Append::BlockCreated { height: 1 });
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.chain()[1].events.len(), 2);
        ledger.verify_chain().unwrap();
    }

    #[test]
    fn lookups_find_signature_and_public_key() {
        let mut ledger = Ledger::new(1);
        ledger.add_action(event("auction", 7, "tok")).unwrap();
        assert_eq!(ledger.find_token_signature("tok"), Some("sig-tok"));
        assert_eq!(ledger.find_auction_public_key(7), Some("pk-7"));
        assert_eq!(ledger.find_auction_public_key(8), None);
        assert!(!ledger.token_used("other"));
    }

    #[test]
    fn genesis_event_is_not_a_token_event() {
        let ledger = Ledger::new(1);
        assert!(!ledger.token_used(constants::GENESIS_EVENT_TYPE));
    }

    #[test]
    fn tampered_genesis_is_detected() {
        let mut chain = Ledger::new(1).chain().to_vec();
        chain[0].events = vec![json!({"type": "genesis", "description": "other"})];
        chain[0].block_hash = chain[0].compute_hash();
        assert_eq!(verify_chain(&chain).unwrap_err().reason, FaultReason::GenesisInvalid);
        assert_eq!(verify_chain(&[]).unwrap_err().reason, FaultReason::Empty);
    }

    #[test]
    fn compare_prefers_strictly_longer() {
        let a = Ledger::new(1);
        let mut b = Ledger::new(1);
        assert_eq!(compare(a.chain(), b.chain()), ChainChoice::Local);
        b.add_action(event("auction", 1, "t")).unwrap();
        assert_eq!(compare(a.chain(), b.chain()), ChainChoice::Remote);
        assert_eq!(compare(b.chain(), a.chain()), ChainChoice::Local);
    }
}
