use std::collections::HashMap;

use rand_core::{CryptoRng, RngCore};
use rsa::traits::PrivateKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::blind::BlindRsa;
use crate::errors::{AuthorityError, CryptoError};

/// Authority-side blind signer with per-identity issuance quotas.
pub struct AuthoritySigner {
    key: RsaPrivateKey,
    rsa: BlindRsa,
    quotas: HashMap<String, u32>,
}

impl AuthoritySigner {
    #[must_use]
    pub fn new(key: RsaPrivateKey) -> Self {
        let rsa = BlindRsa::from_public_key(&key.to_public_key());
        Self { key, rsa, quotas: HashMap::new() }
    }

    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::new(rng, bits).map_err(|e| CryptoError::Key(e.to_string()))?;
        Ok(Self::new(key))
    }

    #[must_use]
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    #[must_use]
    pub const fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    #[must_use]
    pub const fn blind_rsa(&self) -> &BlindRsa {
        &self.rsa
    }

    /// Adds `n` tokens to `identity`'s allowance, creating it if needed.
    pub fn grant(&mut self, identity: &str, n: u32) {
        let q = self.quotas.entry(identity.to_owned()).or_insert(0);
        *q = q.saturating_add(n);
    }

    /// Remaining allowance; errors when the identity is unknown or exhausted.
    pub fn check_quota(&self, identity: &str) -> Result<u32, AuthorityError> {
        match self.quotas.get(identity) {
            None => Err(AuthorityError::UnknownIdentity(identity.to_owned())),
            Some(0) => Err(AuthorityError::QuotaExceeded { identity: identity.to_owned() }),
            Some(n) => Ok(*n),
        }
    }

    /// `s' = (m')^d mod n`, consuming one unit of quota. The signer never
    /// learns the token id behind `m'`.
    pub fn sign_blinded(&mut self, identity: &str, blinded_b64: &str) -> Result<String, AuthorityError> {
        self.check_quota(identity)?;
        let blinded = self
            .rsa
            .decode(blinded_b64)
            .map_err(|e| AuthorityError::Rejected(format!("blinded value: {e}")))?;
        let sig = blinded.modpow(self.key.d(), self.rsa.modulus());
        let encoded = self.rsa.encode(&sig).map_err(|e| AuthorityError::Rejected(e.to_string()))?;
        if let Some(q) = self.quotas.get_mut(identity) {
            *q -= 1;
            debug!(identity, remaining = *q, "blind signature issued");
        }
        Ok(encoded)
    }
}
