use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use crate::errors::AuthorityError;
use crate::identity::Certificate;
use crate::timestamp::SignedTimestamp;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub display_name: String,
    /// SPKI PEM of the joining peer's identity key.
    pub public_key_pem: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registration {
    pub uid: String,
    pub certificate: Certificate,
    pub authority_public_key_pem: String,
    /// Current group key, RSA-OAEP wrapped under the requester's identity key (base64).
    pub group_key_wrapped: String,
}

/// Token-issuing and certifying authority, as seen by a peer.
pub trait Authority: Send + Sync {
    fn public_key(&self) -> RsaPublicKey;

    fn issue_quota(&self, identity: &str) -> Result<(), AuthorityError>;

    /// Raw RSA signature over a blinded value; both sides are fixed-width base64.
    fn blind_sign(&self, identity: &str, blinded_b64: &str) -> Result<String, AuthorityError>;

    /// Current time shifted by `delta_secs`, signed with RSA-PSS.
    fn signed_timestamp(&self, delta_secs: Option<i64>) -> Result<SignedTimestamp, AuthorityError>;

    fn register(&self, request: &RegistrationRequest) -> Result<Registration, AuthorityError>;
}
