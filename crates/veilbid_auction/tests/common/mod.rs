#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rand_core::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::RsaPublicKey;
use veilbid_auction::{AuctionError, AuctionPeer, GroupKey, Message, PeerSettings};
use veilbid_tokens::{
    Authority, AuthorityError, AuthoritySigner, Certificate, Registration, RegistrationRequest,
    SignedTimestamp,
};

/// The skew window leaves room for `ManualClockAuthority::advance`.
pub const TEST_SETTINGS: PeerSettings =
    PeerSettings { max_batch_size: 1, rsa_bits: 1024, max_timestamp_skew_secs: 300 };

/// In-process authority whose clock can be pushed forward.
pub struct ManualClockAuthority {
    signer: Mutex<AuthoritySigner>,
    public: RsaPublicKey,
    group_key: GroupKey,
    next_uid: AtomicU64,
    offset_secs: AtomicI64,
}

impl ManualClockAuthority {
    pub fn new() -> Arc<Self> {
        let signer = AuthoritySigner::generate(&mut OsRng, 1024).unwrap();
        let public = signer.public_key();
        Arc::new(Self {
            signer: Mutex::new(signer),
            public,
            group_key: GroupKey::generate(),
            next_uid: AtomicU64::new(1),
            offset_secs: AtomicI64::new(0),
        })
    }

    pub fn advance(&self, secs: i64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::seconds(self.offset_secs.load(Ordering::SeqCst))
    }
}

impl Authority for ManualClockAuthority {
    fn public_key(&self) -> RsaPublicKey {
        self.public.clone()
    }

    fn issue_quota(&self, identity: &str) -> Result<(), AuthorityError> {
        self.signer.lock().unwrap().check_quota(identity).map(|_| ())
    }

    fn blind_sign(&self, identity: &str, blinded_b64: &str) -> Result<String, AuthorityError> {
        self.signer.lock().unwrap().sign_blinded(identity, blinded_b64)
    }

    fn signed_timestamp(&self, delta_secs: Option<i64>) -> Result<SignedTimestamp, AuthorityError> {
        let at = self.now() + Duration::seconds(delta_secs.unwrap_or(0));
        Ok(SignedTimestamp::issue(self.signer.lock().unwrap().private_key(), &at))
    }

    fn register(&self, request: &RegistrationRequest) -> Result<Registration, AuthorityError> {
        let uid = format!("peer-{}", self.next_uid.fetch_add(1, Ordering::SeqCst));
        let subject = RsaPublicKey::from_public_key_pem(&request.public_key_pem)
            .map_err(|e| AuthorityError::Rejected(e.to_string()))?;
        let mut signer = self.signer.lock().unwrap();
        signer.grant(&uid, 1_000);
        let certificate = Certificate::issue(
            signer.private_key(),
            &uid,
            &request.public_key_pem,
            &request.display_name,
            &Utc::now(),
            Duration::days(365),
        );
        Ok(Registration {
            uid,
            certificate,
            authority_public_key_pem: self.public.to_public_key_pem(LineEnding::LF).unwrap(),
            group_key_wrapped: self.group_key.wrap(&subject).unwrap(),
        })
    }
}

pub fn join(authority: &Arc<ManualClockAuthority>, name: &str) -> AuctionPeer {
    let dyn_authority: Arc<dyn Authority> = authority.clone();
    AuctionPeer::join(dyn_authority, name, None, TEST_SETTINGS).unwrap()
}

/// Floods `outbox` from peer `from` to every other peer until nothing new is
/// produced. Returns the rejections and follow-up failures seen on the way.
pub fn pump(peers: &mut [AuctionPeer], from: usize, outbox: Vec<Message>) -> Vec<AuctionError> {
    let mut queue: VecDeque<(usize, Message)> = outbox.into_iter().map(|m| (from, m)).collect();
    let mut errors = Vec::new();
    while let Some((sender, msg)) = queue.pop_front() {
        for (i, peer) in peers.iter_mut().enumerate() {
            if i == sender {
                continue;
            }
            match peer.handle_message(msg.clone()) {
                Ok(d) => {
                    queue.extend(d.outbox.into_iter().map(|m| (i, m)));
                    errors.extend(d.errors);
                }
                Err(e) => errors.push(e),
            }
        }
    }
    errors
}
