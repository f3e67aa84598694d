use chrono::{DateTime, Utc};
use rand_core::OsRng;
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use veilbid_primitives::{b64d, b64e, parse_iso, to_iso};

use crate::errors::CryptoError;

/// RSA-PSS/SHA-256 signature over `msg`, base64.
#[must_use]
pub fn pss_sign(key: &RsaPrivateKey, msg: &[u8]) -> String {
    let signer = BlindedSigningKey::<Sha256>::new(key.clone());
    b64e(&signer.sign_with_rng(&mut OsRng, msg).to_bytes())
}

pub fn pss_verify(key: &RsaPublicKey, msg: &[u8], sig_b64: &str) -> Result<(), CryptoError> {
    let raw = b64d(sig_b64)?;
    let sig = Signature::try_from(raw.as_slice()).map_err(|_| CryptoError::InvalidSignature)?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(msg, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// An authority-attested point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTimestamp {
    pub timestamp: String,
    pub signature: String,
}

impl SignedTimestamp {
    #[must_use]
    pub fn issue(key: &RsaPrivateKey, at: &DateTime<Utc>) -> Self {
        let timestamp = to_iso(at);
        let signature = pss_sign(key, timestamp.as_bytes());
        Self { timestamp, signature }
    }

    /// Checks the signature and returns the attested instant.
    pub fn verify(&self, authority: &RsaPublicKey) -> Result<DateTime<Utc>, CryptoError> {
        pss_verify(authority, self.timestamp.as_bytes(), &self.signature)?;
        Ok(parse_iso(&self.timestamp)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn timestamp_signature_binds_the_string() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = key.to_public_key();
        let at = Utc::now();
        let ts = SignedTimestamp::issue(&key, &at);
        assert_eq!(ts.verify(&public).unwrap().timestamp_micros(), at.timestamp_micros());

        let mut forged = ts.clone();
        forged.timestamp = to_iso(&(at - Duration::hours(1)));
        assert!(matches!(forged.verify(&public), Err(CryptoError::InvalidSignature)));

        let mut garbled = ts;
        garbled.signature = "not base64!".into();
        assert!(garbled.verify(&public).is_err());
    }
}
