use thiserror::Error;
use veilbid_primitives::PrimitiveError;

/// Failures of a single cryptographic check or transform.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("authenticated decryption failed (tag mismatch)")]
    TagMismatch,
    #[error("blinding factor is not invertible modulo n")]
    NonInvertibleBlindingFactor,
    #[error("token quota exhausted")]
    QuotaExceeded,
    #[error("value out of range for the modulus")]
    OutOfRange,
    #[error("token id is not bound to the disclosed blinding factor")]
    BindingMismatch,
    #[error("certificate is outside its validity window")]
    CertificateExpired,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("RSA-OAEP failure: {0}")]
    Oaep(String),
    #[error("key error: {0}")]
    Key(String),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<PrimitiveError> for CryptoError {
    fn from(e: PrimitiveError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Errors reported by (or while reaching) the token-issuing authority.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("quota exceeded for {identity}")]
    QuotaExceeded { identity: String },
    #[error("unknown identity {0}")]
    UnknownIdentity(String),
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet io: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wallet entry {0} is corrupt")]
    Corrupt(String),
}

/// Errors surfaced by `BlindTokenClient::mint_token`.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}
