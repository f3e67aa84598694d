#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::result_large_err)]

//! Veilbid end-to-end harness.
//!
//! A `Network` holds several `AuctionPeer`s registered with one real
//! `AuthorityContext` and floods every outbound message to the other peers
//! as sealed group-key frames, the same bytes a `PeerNode` would put on its
//! hub. An `Outsider` holds a registered identity and a token client but no
//! peer state machine, for crafting messages no honest peer would send.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rand_core::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use veilbid_auction::{AuctionError, AuctionPeer, Message, PeerSettings};
use veilbid_node::{AuthorityConfig, AuthorityContext};
use veilbid_tokens::{Authority, BlindTokenClient, RegistrationRequest, SignedTimestamp, TokenWallet};

pub const RSA_BITS: usize = 1024;

pub const SETTINGS: PeerSettings = PeerSettings {
    max_batch_size: 1,
    rsa_bits: RSA_BITS,
    max_timestamp_skew_secs: veilbid_primitives::constants::DEFAULT_MAX_TIMESTAMP_SKEW_SECS,
};

pub struct Network {
    pub authority: Arc<AuthorityContext>,
    pub peers: Vec<AuctionPeer>,
}

/// Something a peer refused while a flood was in flight.
#[derive(Debug)]
pub struct Failure {
    pub peer: usize,
    pub error: AuctionError,
}

impl Network {
    #[must_use]
    pub fn new() -> Self {
        let config = AuthorityConfig { rsa_bits: RSA_BITS, ..AuthorityConfig::default() };
        let authority = AuthorityContext::new(config).expect("authority key");
        Self { authority: Arc::new(authority), peers: Vec::new() }
    }

    fn dyn_authority(&self) -> Arc<dyn Authority> {
        self.authority.clone()
    }

    /// Registers a fresh in-memory peer and returns its index.
    pub fn join(&mut self, name: &str) -> usize {
        let peer = AuctionPeer::join(self.dyn_authority(), name, None, SETTINGS).expect("join");
        self.peers.push(peer);
        self.peers.len() - 1
    }

    /// Registers a peer whose ledger, wallet and keyring live under `dir`.
    pub fn join_at(&mut self, name: &str, dir: &Path) -> usize {
        let peer = AuctionPeer::join(self.dyn_authority(), name, Some(dir), SETTINGS).expect("join");
        self.peers.push(peer);
        self.peers.len() - 1
    }

    #[must_use]
    pub fn outsider(&self, name: &str) -> Outsider {
        Outsider::register(&self.authority, name)
    }

    /// Sealed frames for `outbox` under `from`'s current group key.
    #[must_use]
    pub fn frames(&self, from: usize, outbox: &[Message]) -> Vec<String> {
        outbox.iter().map(|m| self.peers[from].encode_frame(m).expect("encode frame")).collect()
    }

    /// Floods `outbox` from peer `from` until the network is quiet.
    pub fn flood(&mut self, from: usize, outbox: Vec<Message>) -> Vec<Failure> {
        self.flood_except(from, outbox, &[])
    }

    /// Like `flood`, but peers listed in `deaf` receive nothing.
    pub fn flood_except(&mut self, from: usize, outbox: Vec<Message>, deaf: &[usize]) -> Vec<Failure> {
        let frames = self.frames(from, &outbox);
        let mut queue: VecDeque<(usize, String)> = frames.into_iter().map(|f| (from, f)).collect();
        let mut failures = Vec::new();
        while let Some((sender, frame)) = queue.pop_front() {
            for i in 0..self.peers.len() {
                if i == sender || deaf.contains(&i) {
                    continue;
                }
                match self.peers[i].handle_frame(&frame) {
                    Ok(d) => {
                        queue.extend(self.frames(i, &d.outbox).into_iter().map(|f| (i, f)));
                        failures.extend(d.errors.into_iter().map(|error| Failure { peer: i, error }));
                    }
                    Err(error) => failures.push(Failure { peer: i, error }),
                }
            }
        }
        failures
    }

    /// Hands one frame to a single peer, then floods whatever it answers.
    pub fn deliver(&mut self, to: usize, frame: &str) -> Result<Vec<Failure>, AuctionError> {
        let d = self.peers[to].handle_frame(frame)?;
        let mut failures = self.flood(to, d.outbox);
        failures.extend(d.errors.into_iter().map(|error| Failure { peer: to, error }));
        Ok(failures)
    }

    /// Sends an authority notice (no sender) to every peer.
    pub fn announce(&mut self, msg: &Message) {
        for peer in &mut self.peers {
            peer.handle_message(msg.clone()).expect("notice");
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered member with tokens and no auction state.
pub struct Outsider {
    pub uid: String,
    pub tokens: BlindTokenClient,
    authority: Arc<AuthorityContext>,
}

impl Outsider {
    fn register(authority: &Arc<AuthorityContext>, name: &str) -> Self {
        let key = RsaPrivateKey::new(&mut OsRng, RSA_BITS).expect("identity key");
        let public_key_pem = key.to_public_key().to_public_key_pem(LineEnding::LF).expect("pem");
        let registration = authority
            .register(&RegistrationRequest { display_name: name.to_owned(), public_key_pem })
            .expect("register");
        let tokens = BlindTokenClient::new(&registration.uid, &authority.public_key(), TokenWallet::in_memory());
        Self { uid: registration.uid, tokens, authority: Arc::clone(authority) }
    }

    /// Mints a token and a current timestamp and attaches both to `msg`.
    #[must_use]
    pub fn authorize(&mut self, msg: Message) -> Message {
        let timestamp = self.authority.signed_timestamp(None).expect("timestamp");
        self.authorize_with(msg, timestamp)
    }

    /// Mints a token and attaches it with a timestamp obtained earlier.
    #[must_use]
    pub fn authorize_with(&mut self, mut msg: Message, timestamp: SignedTimestamp) -> Message {
        let token = self.tokens.mint_token(self.authority.as_ref()).expect("mint");
        msg.sign_with(token, timestamp);
        msg
    }
}

/// Closing dates are checked against the authority's real clock.
pub fn sleep_past(closing: DateTime<Utc>) {
    let left = (closing - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
    std::thread::sleep(left + StdDuration::from_millis(100));
}
