use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use veilbid_primitives::write_atomic;

use crate::errors::KeyringError;

/// Ephemeral auction keys, keyed by the id of the token that created the auction.
#[derive(Debug, Default)]
pub struct Keyring {
    path: Option<PathBuf>,
    keys: BTreeMap<String, String>,
}

impl Keyring {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, KeyringError> {
        let path = path.as_ref().to_path_buf();
        let keys = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: Some(path), keys })
    }

    pub fn insert(&mut self, creation_token: &str, key: &RsaPrivateKey) -> Result<(), KeyringError> {
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyringError::Key(creation_token.to_owned(), e.to_string()))?;
        self.keys.insert(creation_token.to_owned(), pem.as_str().to_owned());
        self.persist()
    }

    pub fn get(&self, creation_token: &str) -> Result<Option<RsaPrivateKey>, KeyringError> {
        self.keys
            .get(creation_token)
            .map(|pem| {
                RsaPrivateKey::from_pkcs8_pem(pem)
                    .map_err(|e| KeyringError::Key(creation_token.to_owned(), e.to_string()))
            })
            .transpose()
    }

    fn persist(&self) -> Result<(), KeyringError> {
        let Some(path) = &self.path else { return Ok(()) };
        write_atomic(path, &serde_json::to_vec_pretty(&self.keys)?)?;
        Ok(())
    }
}
