use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rsa::BigUint;
use serde::{Deserialize, Serialize};
use veilbid_primitives::write_atomic;

use crate::blind::from_decimal;
use crate::errors::WalletError;

/// One minted token as kept at rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub token_id: String,
    /// Decimal string.
    pub blinding_factor: String,
    /// Base64, modulus-length big-endian.
    pub signature: String,
    pub issued_at: String,
}

impl WalletEntry {
    pub fn blinding_factor(&self) -> Result<BigUint, WalletError> {
        from_decimal(&self.blinding_factor).map_err(|_| WalletError::Corrupt(self.token_id.clone()))
    }
}

/// Token wallet persisted as a JSON array, rewritten in full on every insert.
#[derive(Debug, Default)]
pub struct TokenWallet {
    path: Option<PathBuf>,
    entries: BTreeMap<String, WalletEntry>,
}

impl TokenWallet {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the wallet at `path`; a missing file is an empty wallet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<WalletEntry>>(&bytes)?
                .into_iter()
                .map(|e| (e.token_id.clone(), e))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: Some(path), entries })
    }

    pub fn insert(&mut self, entry: WalletEntry) -> Result<(), WalletError> {
        self.entries.insert(entry.token_id.clone(), entry);
        self.persist()
    }

    #[must_use]
    pub fn get(&self, token_id: &str) -> Option<&WalletEntry> {
        self.entries.get(token_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &WalletEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), WalletError> {
        let Some(path) = &self.path else { return Ok(()) };
        let list: Vec<&WalletEntry> = self.entries.values().collect();
        write_atomic(path, &serde_json::to_vec_pretty(&list)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> WalletEntry {
        WalletEntry {
            token_id: id.into(),
            blinding_factor: "12345".into(),
            signature: "AAEC".into(),
            issued_at: "2025-01-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn wallet_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        {
            let mut w = TokenWallet::open(&path).unwrap();
            assert!(w.is_empty());
            w.insert(entry("a")).unwrap();
            w.insert(entry("b")).unwrap();
        }
        let w = TokenWallet::open(&path).unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w.get("a").unwrap().blinding_factor().unwrap(), BigUint::from(12345u32));
    }

    #[test]
    fn corrupt_blinding_factor_is_reported() {
        let mut e = entry("x");
        e.blinding_factor = "zz".into();
        assert!(matches!(e.blinding_factor(), Err(WalletError::Corrupt(_))));
    }
}
