//! Minimal authority-issued identity certificates.
//!
//! A `Certificate` binds a display name and uid to an RSA subject key. Its
//! base64 JSON encoding is the opaque identity proof exchanged during reveal.

use chrono::{DateTime, Duration, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use veilbid_primitives::{b64d, b64e, canonical_json, parse_iso, to_iso};

use crate::errors::CryptoError;
use crate::timestamp::{pss_sign, pss_verify};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub uid: String,
    /// SPKI PEM of the holder's identity key.
    pub subject_key: String,
    pub display_name: String,
    pub issued_at: String,
    pub expires_at: String,
    pub signature: String,
}

impl Certificate {
    #[must_use]
    pub fn issue(
        authority: &RsaPrivateKey,
        uid: &str,
        subject_key_pem: &str,
        display_name: &str,
        issued_at: &DateTime<Utc>,
        validity: Duration,
    ) -> Self {
        let mut cert = Self {
            uid: uid.to_owned(),
            subject_key: subject_key_pem.to_owned(),
            display_name: display_name.to_owned(),
            issued_at: to_iso(issued_at),
            expires_at: to_iso(&(*issued_at + validity)),
            signature: String::new(),
        };
        cert.signature = pss_sign(authority, &cert.signed_bytes());
        cert
    }

    fn signed_bytes(&self) -> Vec<u8> {
        canonical_json(&json!({
            "uid": self.uid,
            "subject_key": self.subject_key,
            "display_name": self.display_name,
            "issued_at": self.issued_at,
            "expires_at": self.expires_at,
        }))
    }

    /// Signature check plus validity window at `at`.
    pub fn verify(&self, authority: &RsaPublicKey, at: &DateTime<Utc>) -> Result<(), CryptoError> {
        pss_verify(authority, &self.signed_bytes(), &self.signature)?;
        let not_before = parse_iso(&self.issued_at)?;
        let not_after = parse_iso(&self.expires_at)?;
        if *at < not_before || *at > not_after {
            return Err(CryptoError::CertificateExpired);
        }
        Ok(())
    }

    pub fn subject_public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        RsaPublicKey::from_public_key_pem(&self.subject_key).map_err(|e| CryptoError::Key(e.to_string()))
    }

    pub fn to_proof(&self) -> Result<String, CryptoError> {
        Ok(b64e(&serde_json::to_vec(self)?))
    }

    pub fn from_proof(proof: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(&b64d(proof)?)?)
    }
}
