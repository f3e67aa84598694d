use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use veilbid_primitives::write_atomic;

use crate::errors::SettlementError;
use crate::reveal::Settlement;

/// Reveals this peer completed. Only these mark an auction `Settled`; reveal
/// traffic seen on the ledger never does.
#[derive(Debug, Default)]
pub struct SettlementBook {
    path: Option<PathBuf>,
    entries: BTreeMap<u64, Settlement>,
}

impl SettlementBook {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettlementError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: Some(path), entries })
    }

    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<u64, Settlement> {
        &self.entries
    }

    pub fn record(&mut self, settlement: Settlement) -> Result<(), SettlementError> {
        self.entries.insert(settlement.auction_id, settlement);
        let Some(path) = &self.path else { return Ok(()) };
        write_atomic(path, &serde_json::to_vec_pretty(&self.entries)?)?;
        Ok(())
    }
}
