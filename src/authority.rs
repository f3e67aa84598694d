//! In-process authority: blind signing with quotas, signed timestamps,
//! registration with certificates, and group-key custody.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand_core::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::RsaPublicKey;
use tracing::{debug, info};
use veilbid_auction::messages::Message;
use veilbid_auction::{group_key, GroupKey};
use veilbid_tokens::{
    Authority, AuthorityError, AuthoritySigner, Certificate, CryptoError, Registration,
    RegistrationRequest, SignedTimestamp,
};

use crate::config::AuthorityConfig;
use crate::errors::NodeError;

struct Member {
    public_key: RsaPublicKey,
    certificate: Certificate,
}

struct AuthorityState {
    signer: AuthoritySigner,
    members: BTreeMap<String, Member>,
    group_key: GroupKey,
    next_uid: u64,
}

/// Owned by the caller and shared with peers through `Arc<dyn Authority>`.
pub struct AuthorityContext {
    state: Mutex<AuthorityState>,
    public_key: RsaPublicKey,
    public_key_pem: String,
    config: AuthorityConfig,
}

impl AuthorityContext {
    pub fn new(config: AuthorityConfig) -> Result<Self, CryptoError> {
        let signer = AuthoritySigner::generate(&mut OsRng, config.rsa_bits)?;
        Self::from_signer(signer, config)
    }

    pub fn from_signer(signer: AuthoritySigner, config: AuthorityConfig) -> Result<Self, CryptoError> {
        let public_key = signer.public_key();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        Ok(Self {
            state: Mutex::new(AuthorityState {
                signer,
                members: BTreeMap::new(),
                group_key: GroupKey::generate(),
                next_uid: 1,
            }),
            public_key,
            public_key_pem,
            config,
        })
    }

    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Adds `n` tokens to a member's quota.
    pub fn grant(&self, uid: &str, n: u32) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if !state.members.contains_key(uid) {
            return Err(NodeError::UnknownMember(uid.to_owned()));
        }
        state.signer.grant(uid, n);
        Ok(())
    }

    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.state.lock().members.keys().cloned().collect()
    }

    /// De-anonymization hook for disputes: the certificate behind a uid.
    #[must_use]
    pub fn certificate_of(&self, uid: &str) -> Option<Certificate> {
        self.state.lock().members.get(uid).map(|m| m.certificate.clone())
    }

    /// Removes a member and rotates the group key for everyone else.
    /// The returned `new_key` message must be broadcast.
    pub fn peer_left(&self, uid: &str) -> Result<Message, NodeError> {
        let mut state = self.state.lock();
        if state.members.remove(uid).is_none() {
            return Err(NodeError::UnknownMember(uid.to_owned()));
        }
        let remaining: Vec<RsaPublicKey> = state.members.values().map(|m| m.public_key.clone()).collect();
        let (key, msg) = group_key::rotate(&remaining)?;
        state.group_key = key;
        info!(uid, remaining = remaining.len(), "member left, group key rotated");
        Ok(Message::NewKey(msg))
    }
}

impl Authority for AuthorityContext {
    fn public_key(&self) -> RsaPublicKey {
        self.public_key.clone()
    }

    fn issue_quota(&self, identity: &str) -> Result<(), AuthorityError> {
        self.state.lock().signer.check_quota(identity).map(|_| ())
    }

    fn blind_sign(&self, identity: &str, blinded_b64: &str) -> Result<String, AuthorityError> {
        self.state.lock().signer.sign_blinded(identity, blinded_b64)
    }

    fn signed_timestamp(&self, delta_secs: Option<i64>) -> Result<SignedTimestamp, AuthorityError> {
        let at = Utc::now() + chrono::Duration::seconds(delta_secs.unwrap_or(0));
        Ok(SignedTimestamp::issue(self.state.lock().signer.private_key(), &at))
    }

    fn register(&self, request: &RegistrationRequest) -> Result<Registration, AuthorityError> {
        if request.display_name.trim().is_empty() {
            return Err(AuthorityError::Rejected("display name is empty".into()));
        }
        let subject = RsaPublicKey::from_public_key_pem(&request.public_key_pem)
            .map_err(|e| AuthorityError::Rejected(format!("subject key: {e}")))?;

        let mut state = self.state.lock();
        let uid = format!("member-{:04}", state.next_uid);
        state.next_uid += 1;
        let certificate = Certificate::issue(
            state.signer.private_key(),
            &uid,
            &request.public_key_pem,
            &request.display_name,
            &Utc::now(),
            chrono::Duration::days(self.config.certificate_validity_days),
        );
        let group_key_wrapped = state
            .group_key
            .wrap(&subject)
            .map_err(|e| AuthorityError::Rejected(e.to_string()))?;
        state.signer.grant(&uid, self.config.initial_quota);
        state.members.insert(uid.clone(), Member { public_key: subject, certificate: certificate.clone() });
        info!(%uid, display_name = %request.display_name, "member registered");

        Ok(Registration {
            uid,
            certificate,
            authority_public_key_pem: self.public_key_pem.clone(),
            group_key_wrapped,
        })
    }
}

/// Runs every call on a helper thread and gives up after `timeout`.
pub struct BoundedAuthority {
    inner: Arc<dyn Authority>,
    timeout: Duration,
}

impl BoundedAuthority {
    #[must_use]
    pub fn new(inner: Arc<dyn Authority>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, AuthorityError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Authority) -> Result<T, AuthorityError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            // The caller may have given up already.
            let _ = tx.send(f(inner.as_ref()));
        });
        rx.recv_timeout(self.timeout).unwrap_or_else(|_| {
            debug!(op, timeout = ?self.timeout, "authority call timed out");
            Err(AuthorityError::Unavailable(format!("{op} timed out after {:?}", self.timeout)))
        })
    }
}

impl Authority for BoundedAuthority {
    fn public_key(&self) -> RsaPublicKey {
        self.inner.public_key()
    }

    fn issue_quota(&self, identity: &str) -> Result<(), AuthorityError> {
        let identity = identity.to_owned();
        self.call("issue_quota", move |a| a.issue_quota(&identity))
    }

    fn blind_sign(&self, identity: &str, blinded_b64: &str) -> Result<String, AuthorityError> {
        let (identity, blinded) = (identity.to_owned(), blinded_b64.to_owned());
        self.call("blind_sign", move |a| a.blind_sign(&identity, &blinded))
    }

    fn signed_timestamp(&self, delta_secs: Option<i64>) -> Result<SignedTimestamp, AuthorityError> {
        self.call("signed_timestamp", move |a| a.signed_timestamp(delta_secs))
    }

    fn register(&self, request: &RegistrationRequest) -> Result<Registration, AuthorityError> {
        let request = request.clone();
        self.call("register", move |a| a.register(&request))
    }
}
