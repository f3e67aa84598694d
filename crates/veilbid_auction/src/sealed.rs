//! AES-256-GCM envelopes and RSA-OAEP key wrapping.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use veilbid_primitives::{b64d, b64e, constants::GCM_NONCE_LEN};
use veilbid_tokens::CryptoError;

/// `{nonce, ciphertext}`, both base64. The ciphertext carries the GCM tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub nonce: String,
    pub ciphertext: String,
}

/// 256-bit symmetric key (deal keys and group keys).
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl SymmetricKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Key(format!("expected 32 key bytes, got {}", bytes.len())))?;
        Ok(Self(key))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short public identifier for logs and key-agreement checks.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hex = veilbid_primitives::sha256_hex(&self.0);
        hex.truncate(16);
        hex
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|e| CryptoError::Key(e.to_string()))?;
        let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Key(format!("encryption failed: {e}")))?;
        Ok(Sealed { nonce: b64e(&nonce_bytes), ciphertext: b64e(&ciphertext) })
    }

    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>, CryptoError> {
        let nonce: [u8; GCM_NONCE_LEN] = b64d(&sealed.nonce)?
            .try_into()
            .map_err(|_| CryptoError::Decode("nonce must be 12 bytes".into()))?;
        let ciphertext = b64d(&sealed.ciphertext)?;
        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|e| CryptoError::Key(e.to_string()))?;
        cipher.decrypt(&Nonce::from(nonce), ciphertext.as_slice()).map_err(|_| CryptoError::TagMismatch)
    }

    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<Sealed, CryptoError> {
        self.seal(&serde_json::to_vec(value)?)
    }

    pub fn open_json<T: DeserializeOwned>(&self, sealed: &Sealed) -> Result<T, CryptoError> {
        Ok(serde_json::from_slice(&self.open(sealed)?)?)
    }

    /// RSA-OAEP(SHA-256) wrap under `recipient`, base64.
    pub fn wrap(&self, recipient: &RsaPublicKey) -> Result<String, CryptoError> {
        let ct = recipient
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &self.0)
            .map_err(|e| CryptoError::Oaep(e.to_string()))?;
        Ok(b64e(&ct))
    }

    pub fn unwrap_with(wrapped_b64: &str, key: &RsaPrivateKey) -> Result<Self, CryptoError> {
        let ct = b64d(wrapped_b64)?;
        let raw = key
            .decrypt(Oaep::new::<Sha256>(), &ct)
            .map_err(|e| CryptoError::Oaep(e.to_string()))?;
        Self::from_slice(&raw)
    }
}
