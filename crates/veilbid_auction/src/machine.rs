//! `AuctionPeer`: one peer's protocol state and the acceptance pipeline.
//!
//! Every message, remote or locally built, goes through the same gates:
//! token shape, token signature, unspent token, trusted timestamp, then the
//! type rule. Accepted messages are committed (ledger or control-token set)
//! and may trigger one follow-up message, which is fed back through the same
//! pipeline before it is handed to the caller for broadcast.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, instrument, warn};
use veilbid_ledger::{verify_chain, Block, Ledger, MergeOutcome};
use veilbid_primitives::to_iso;
use veilbid_tokens::{
    Authority, BlindTokenClient, Certificate, CryptoError, RegistrationRequest, TokenWallet,
};

use crate::errors::{AuctionError, FrameError, Rejection, RevealError};
use crate::group_key::{self, GroupKey};
use crate::keyring::Keyring;
use crate::messages::{
    AuctionEndMsg, AuctionMsg, BidMsg, LedgerRequestMsg, LedgerUpdateMsg, Message, NewKeyMsg,
    RevelationMsg, WinnerTokenRevealMsg,
};
use crate::projection::{project, AuctionState, Projection};
use crate::reveal::{
    build_owner_revelation, build_winner_identity, build_winner_proof, open_owner_revelation,
    open_winner_identity, open_winner_proof, RevealContext, RevealPhase, RevealSession, Role,
    Settlement,
};
use crate::settlements::SettlementBook;

pub const LEDGER_FILE: &str = "ledger.json";
pub const WALLET_FILE: &str = "wallet.json";
pub const KEYRING_FILE: &str = "auction_keys.json";
pub const SETTLEMENTS_FILE: &str = "settlements.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub max_batch_size: usize,
    /// Size of identity and ephemeral auction keys.
    pub rsa_bits: usize,
    /// Inbound authority timestamps further than this from the local clock are refused.
    pub max_timestamp_skew_secs: i64,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_batch_size: veilbid_primitives::constants::DEFAULT_MAX_BATCH_SIZE,
            rsa_bits: 2048,
            max_timestamp_skew_secs: veilbid_primitives::constants::DEFAULT_MAX_TIMESTAMP_SKEW_SECS,
        }
    }
}

pub struct PeerIdentity {
    pub uid: String,
    pub key: RsaPrivateKey,
    pub certificate: Certificate,
}

pub struct PeerStores {
    pub ledger: Ledger,
    pub wallet: TokenWallet,
    pub keyring: Keyring,
    pub settlements: SettlementBook,
}

impl PeerStores {
    #[must_use]
    pub fn in_memory(max_batch_size: usize) -> Self {
        Self {
            ledger: Ledger::new(max_batch_size),
            wallet: TokenWallet::in_memory(),
            keyring: Keyring::in_memory(),
            settlements: SettlementBook::in_memory(),
        }
    }

    /// `ledger.json`, `wallet.json`, `auction_keys.json` and `settlements.json` under `dir`.
    pub fn open(dir: &Path, max_batch_size: usize) -> Result<Self, AuctionError> {
        std::fs::create_dir_all(dir).map_err(veilbid_ledger::LedgerError::from)?;
        Ok(Self {
            ledger: Ledger::open(dir.join(LEDGER_FILE), max_batch_size)?,
            wallet: TokenWallet::open(dir.join(WALLET_FILE))?,
            keyring: Keyring::open(dir.join(KEYRING_FILE))?,
            settlements: SettlementBook::open(dir.join(SETTLEMENTS_FILE))?,
        })
    }
}

/// Messages to broadcast plus failures of follow-up steps. A rejected inbound
/// message is an `Err` instead; follow-up failures never undo what was accepted.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub outbox: Vec<Message>,
    pub errors: Vec<AuctionError>,
}

impl Dispatch {
    fn absorb(&mut self, other: Self) {
        self.outbox.extend(other.outbox);
        self.errors.extend(other.errors);
    }
}

pub struct AuctionPeer {
    identity: PeerIdentity,
    authority: Arc<dyn Authority>,
    authority_key: RsaPublicKey,
    tokens: BlindTokenClient,
    ledger: Ledger,
    keyring: Keyring,
    projection: Projection,
    sessions: BTreeMap<u64, RevealSession>,
    settlements: SettlementBook,
    control_tokens: HashSet<String>,
    outstanding_request: Option<String>,
    group_key: Option<GroupKey>,
    settings: PeerSettings,
}

impl AuctionPeer {
    #[must_use]
    pub fn new(
        identity: PeerIdentity,
        authority: Arc<dyn Authority>,
        authority_key: RsaPublicKey,
        stores: PeerStores,
        group_key: Option<GroupKey>,
        settings: PeerSettings,
    ) -> Self {
        let tokens = BlindTokenClient::new(&identity.uid, &authority_key, stores.wallet);
        let mut peer = Self {
            identity,
            authority,
            authority_key,
            tokens,
            ledger: stores.ledger,
            keyring: stores.keyring,
            projection: Projection::new(),
            sessions: BTreeMap::new(),
            settlements: stores.settlements,
            control_tokens: HashSet::new(),
            outstanding_request: None,
            group_key,
            settings,
        };
        peer.rebuild_projection();
        peer
    }

    /// Generates an identity key, registers with the authority and opens the
    /// peer's stores (in memory when `data_dir` is `None`).
    #[instrument(level = "info", skip(authority, settings))]
    pub fn join(
        authority: Arc<dyn Authority>,
        display_name: &str,
        data_dir: Option<&Path>,
        settings: PeerSettings,
    ) -> Result<Self, AuctionError> {
        let key = RsaPrivateKey::new(&mut OsRng, settings.rsa_bits).map_err(|e| CryptoError::Key(e.to_string()))?;
        let public_key_pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        let registration = authority.register(&RegistrationRequest {
            display_name: display_name.to_owned(),
            public_key_pem,
        })?;
        let authority_key = RsaPublicKey::from_public_key_pem(&registration.authority_public_key_pem)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        let group_key = GroupKey::unwrap_with(&registration.group_key_wrapped, &key)?;
        let stores = match data_dir {
            Some(dir) => PeerStores::open(dir, settings.max_batch_size)?,
            None => PeerStores::in_memory(settings.max_batch_size),
        };
        info!(uid = %registration.uid, "registered with authority");
        let identity = PeerIdentity { uid: registration.uid, key, certificate: registration.certificate };
        Ok(Self::new(identity, authority, authority_key, stores, Some(group_key), settings))
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        &self.identity.uid
    }

    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.identity.certificate
    }

    #[must_use]
    pub fn identity_public_key(&self) -> RsaPublicKey {
        self.identity.key.to_public_key()
    }

    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub const fn wallet(&self) -> &TokenWallet {
        self.tokens.wallet()
    }

    #[must_use]
    pub const fn group_key(&self) -> Option<&GroupKey> {
        self.group_key.as_ref()
    }

    /// Cloned view of the projection.
    #[must_use]
    pub fn snapshot(&self) -> Projection {
        self.projection.clone()
    }

    #[must_use]
    pub fn session(&self, auction_id: u64) -> Option<&RevealSession> {
        self.sessions.get(&auction_id)
    }

    #[must_use]
    pub const fn settlements(&self) -> &BTreeMap<u64, Settlement> {
        self.settlements.entries()
    }

    // === Wire ===

    pub fn encode_frame(&self, msg: &Message) -> Result<String, FrameError> {
        group_key::encode_frame(msg, self.group_key.as_ref())
    }

    pub fn decode_frame(&self, frame: &str) -> Result<Message, FrameError> {
        group_key::decode_frame(frame, self.group_key.as_ref())
    }

    pub fn handle_frame(&mut self, frame: &str) -> Result<Dispatch, AuctionError> {
        let msg = self.decode_frame(frame)?;
        self.handle_message(msg)
    }

    /// Entry point for every inbound message.
    #[instrument(level = "debug", skip_all, fields(kind = msg.kind()))]
    pub fn handle_message(&mut self, msg: Message) -> Result<Dispatch, AuctionError> {
        if let Message::NewKey(nk) = &msg {
            self.adopt_group_key(nk);
            return Ok(Dispatch::default());
        }
        self.run(msg, false)
    }

    fn adopt_group_key(&mut self, msg: &NewKeyMsg) {
        if let Some(key) = group_key::adopt(msg, &self.identity.key) {
            info!(fingerprint = %key.fingerprint(), "adopted rotated group key");
            self.group_key = Some(key);
        }
    }

    // === Local commands ===

    #[instrument(level = "info", skip(self))]
    pub fn create_auction(
        &mut self,
        name: &str,
        min_bid: u64,
        closing_time: DateTime<Utc>,
    ) -> Result<(u64, Dispatch), AuctionError> {
        if name.trim().is_empty() {
            return Err(AuctionError::InvalidArgument("auction name is empty".into()));
        }
        let ephemeral =
            RsaPrivateKey::new(&mut OsRng, self.settings.rsa_bits).map_err(|e| CryptoError::Key(e.to_string()))?;
        let public_key = ephemeral
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        let id = self.projection.next_auction_id;
        let msg = self.authorize(Message::Auction(AuctionMsg {
            id,
            name: name.trim().to_owned(),
            min_bid,
            closing_date: to_iso(&closing_time),
            public_key,
            token: None,
            timestamp: None,
        }))?;
        if let Some(token) = msg.token() {
            self.keyring.insert(&token.token_id, &ephemeral)?;
        }
        let dispatch = self.run(msg, true)?;
        Ok((id, dispatch))
    }

    #[instrument(level = "info", skip(self))]
    pub fn place_bid(&mut self, auction_id: u64, amount: u64) -> Result<Dispatch, AuctionError> {
        if self.projection.is_mine(auction_id) {
            return Err(AuctionError::OwnAuction(auction_id));
        }
        let draft = BidMsg { auction_id, bid: amount, token: None, timestamp: None };
        // Fail early on the local view before spending a token.
        self.projection.check_bid(&draft, Utc::now())?;
        let msg = self.authorize(Message::Bid(draft))?;
        self.run(msg, true)
    }

    /// Broadcast a `ledger_request`; matching `ledger_update`s are merged.
    pub fn request_ledger(&mut self) -> Result<Dispatch, AuctionError> {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        let request_id = hex::encode(id);
        self.outstanding_request = Some(request_id.clone());
        let msg = self.authorize(Message::LedgerRequest(LedgerRequestMsg { request_id, token: None, timestamp: None }))?;
        self.run(msg, true)
    }

    /// Drops the reveal session for `auction_id`, if any.
    pub fn abandon_reveal(&mut self, auction_id: u64) -> bool {
        let dropped = self.sessions.remove(&auction_id).is_some();
        if dropped {
            warn!(auction_id, "reveal session abandoned");
        }
        dropped
    }

    /// Closing monitor tick: publishes `auctionEnd` for owned auctions past
    /// their closing date and retries reveal steps that failed to publish.
    #[instrument(level = "debug", skip_all)]
    pub fn check_closing(&mut self, now: DateTime<Utc>) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let due: Vec<u64> = self
            .projection
            .my_auctions
            .keys()
            .filter_map(|id| self.projection.get(*id))
            .filter(|e| matches!(e.state, AuctionState::Open | AuctionState::Closing) && now >= e.closing_time)
            .map(|e| e.id)
            .collect();

        for auction_id in due {
            self.projection.mark_closing(auction_id);
            let end = Message::AuctionEnd(AuctionEndMsg { auction_id, token: None, timestamp: None });
            match self.authorize(end).and_then(|msg| self.run(msg, true)) {
                Ok(d) => dispatch.absorb(d),
                Err(e) => {
                    warn!(auction_id, error = %e, "auction stays closing, will retry");
                    dispatch.errors.push(e);
                }
            }
        }

        let retries: Vec<(u64, Role, bool)> = self
            .sessions
            .values()
            .filter(|s| s.phase == RevealPhase::AwaitingWinnerProof)
            .map(|s| (s.auction_id, s.role, s.deal_key.is_some()))
            .collect();
        for (auction_id, role, has_deal_key) in retries {
            let attempt = match role {
                Role::Winner => self.send_winner_proof(auction_id),
                Role::Owner if has_deal_key => self.send_owner_proof(auction_id),
                Role::Owner => continue,
            };
            match attempt.and_then(|msg| self.run(msg, true)) {
                Ok(d) => dispatch.absorb(d),
                Err(e) => {
                    warn!(auction_id, error = %e, "reveal retry failed");
                    dispatch.errors.push(e);
                }
            }
        }
        dispatch
    }

    // === Pipeline ===

    fn authorize(&mut self, mut msg: Message) -> Result<Message, AuctionError> {
        let token = self.tokens.mint_token(self.authority.as_ref())?;
        let timestamp = self.authority.signed_timestamp(None)?;
        msg.sign_with(token, timestamp);
        Ok(msg)
    }

    /// Gates 1–4. Returns the trusted time of the message.
    fn admit(&self, msg: &Message) -> Result<DateTime<Utc>, Rejection> {
        // 1) Token present and well-formed
        let token = msg.token().ok_or(Rejection::MissingToken)?;
        if !token.is_well_formed() { return Err(Rejection::MalformedToken); }
        // 2) Token signature
        if !self.tokens.verify_token(token) { return Err(Rejection::InvalidTokenSignature); }
        // 3) Unspent
        if self.ledger.token_used(&token.token_id) || self.control_tokens.contains(&token.token_id) {
            return Err(Rejection::DoubleSpend(token.token_id.clone()));
        }
        // 4) Authority timestamp
        let ts = msg.timestamp().ok_or(Rejection::MissingTimestamp)?;
        let at = ts.verify(&self.authority_key).map_err(|_| Rejection::UntrustedTimestamp)?;
        //    and within the skew window of the local clock
        if (Utc::now() - at).num_seconds().abs() > self.settings.max_timestamp_skew_secs {
            return Err(Rejection::StaleTimestamp(ts.timestamp.clone()));
        }
        Ok(at)
    }

    /// Type rule, then ledger append (or control-token record).
    fn commit(&mut self, msg: &Message, at: DateTime<Utc>) -> Result<(), AuctionError> {
        if msg.is_control() {
            if let Some(t) = msg.token() {
                self.control_tokens.insert(t.token_id.clone());
            }
            return Ok(());
        }
        if let Message::Bid(m) = msg {
            self.projection.check_bidding_open(m.auction_id, Utc::now())?;
        }
        let wallet = self.tokens.wallet();
        self.projection.apply(msg, at, &|t: &str| wallet.get(t).is_some())?;
        self.ledger.add_action(msg.to_event()?)?;
        Ok(())
    }

    fn react(&mut self, msg: &Message) -> Result<Option<Message>, AuctionError> {
        match msg {
            Message::AuctionEnd(m) => self.on_auction_end(m.auction_id),
            Message::WinnerTokenReveal(m) => self.on_winner_proof(m),
            Message::OwnerRevelation(m) => self.on_owner_revelation(m),
            Message::WinnerRevelation(m) => self.on_winner_identity(m),
            Message::LedgerRequest(m) => self.on_ledger_request(m),
            Message::LedgerUpdate(m) => self.on_ledger_update(m),
            Message::Auction(_) | Message::Bid(_) | Message::NewKey(_) => Ok(None),
        }
    }

    /// Runs `first` and any follow-ups through the pipeline.
    fn run(&mut self, first: Message, local: bool) -> Result<Dispatch, AuctionError> {
        let mut dispatch = Dispatch::default();
        let mut current = first;
        let mut is_local = local;
        let mut is_first = true;
        loop {
            let step = self
                .admit(&current)
                .map_err(AuctionError::from)
                .and_then(|at| self.commit(&current, at));
            if let Err(e) = step {
                log_rejection(&current, &e);
                if is_first {
                    return Err(e);
                }
                dispatch.errors.push(e);
                break;
            }
            info!(kind = current.kind(), auction_id = ?current.auction_id(), local = is_local, "message accepted");

            let reaction = self.react(&current);
            if is_local {
                dispatch.outbox.push(current);
            }
            match reaction {
                Ok(Some(next)) => {
                    current = next;
                    is_local = true;
                    is_first = false;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "follow-up step failed");
                    dispatch.errors.push(e);
                    break;
                }
            }
        }
        Ok(dispatch)
    }

    fn rebuild_projection(&mut self) {
        let wallet = self.tokens.wallet();
        let closing: Vec<u64> = self
            .projection
            .auctions
            .values()
            .filter(|e| e.state == AuctionState::Closing)
            .map(|e| e.id)
            .collect();
        self.projection = project(self.ledger.events(), &|t: &str| wallet.get(t).is_some());
        for id in closing {
            self.projection.mark_closing(id);
        }
        for id in self.settlements.entries().keys() {
            self.projection.mark_settled(*id);
        }
    }

    // === Ledger sync ===

    fn on_ledger_request(&mut self, msg: &LedgerRequestMsg) -> Result<Option<Message>, AuctionError> {
        if self.outstanding_request.as_deref() == Some(msg.request_id.as_str()) {
            return Ok(None);
        }
        let update = LedgerUpdateMsg {
            request_id: msg.request_id.clone(),
            chain: self.ledger.chain().to_vec(),
            token: None,
            timestamp: None,
        };
        self.authorize(Message::LedgerUpdate(update)).map(Some)
    }

    fn on_ledger_update(&mut self, msg: &LedgerUpdateMsg) -> Result<Option<Message>, AuctionError> {
        if self.outstanding_request.as_deref() != Some(msg.request_id.as_str()) {
            debug!(request_id = %msg.request_id, "ledger update for another peer");
            return Ok(None);
        }
        self.revalidate_chain(&msg.chain)?;
        match self.ledger.merge_remote(msg.chain.clone())? {
            MergeOutcome::Replaced { height } => {
                self.rebuild_projection();
                info!(height, "ledger synchronized from peer");
            }
            MergeOutcome::KeptLocal => debug!("remote chain not longer, kept local"),
        }
        Ok(None)
    }

    /// Structural check plus re-authorization of every event in a remote chain.
    fn revalidate_chain(&self, chain: &[Block]) -> Result<(), Rejection> {
        verify_chain(chain)?;
        let mut seen: HashSet<String> = HashSet::new();
        for event in chain.iter().skip(1).flat_map(|b| b.events.iter()) {
            let msg = Message::from_event(event).map_err(|e| Rejection::RemoteChain(e.to_string()))?;
            if msg.is_control() {
                return Err(Rejection::RemoteChain(format!("{} inside chain", msg.kind())));
            }
            let token = msg.token().ok_or(Rejection::MissingToken)?;
            if !self.tokens.verify_token(token) {
                return Err(Rejection::InvalidTokenSignature);
            }
            if !seen.insert(token.token_id.clone()) {
                return Err(Rejection::DoubleSpend(token.token_id.clone()));
            }
            let ts = msg.timestamp().ok_or(Rejection::MissingTimestamp)?;
            ts.verify(&self.authority_key).map_err(|_| Rejection::UntrustedTimestamp)?;
        }
        Ok(())
    }

    // === Reveal ===

    fn reveal_ctx(&self) -> RevealContext<'_> {
        RevealContext {
            ledger: &self.ledger,
            rsa: self.tokens.rsa(),
            authority_key: &self.authority_key,
            now: Utc::now(),
        }
    }

    fn on_auction_end(&mut self, auction_id: u64) -> Result<Option<Message>, AuctionError> {
        let Some(entry) = self.projection.get(auction_id) else { return Ok(None) };
        let Some(winning) = entry.winning_token.clone() else {
            info!(auction_id, "auction closed without bids");
            return Ok(None);
        };
        if self.projection.is_mine(auction_id) {
            self.sessions.insert(auction_id, RevealSession::new(auction_id, Role::Owner));
            info!(auction_id, highest = entry.highest_bid, "auction closed, awaiting winner");
            return Ok(None);
        }
        if self.tokens.wallet().get(&winning).is_some() {
            self.sessions.insert(auction_id, RevealSession::new(auction_id, Role::Winner));
            info!(auction_id, "auction won, revealing winning token to owner");
            return self.send_winner_proof(auction_id).map(Some);
        }
        Ok(None)
    }

    fn send_winner_proof(&mut self, auction_id: u64) -> Result<Message, AuctionError> {
        let entry = self.projection.get(auction_id).cloned().ok_or(Rejection::UnknownAuction(auction_id))?;
        let token = entry.winning_token.ok_or(RevealError::NoSession(auction_id))?;
        let r = self
            .tokens
            .blinding_factor(&token)?
            .ok_or_else(|| RevealError::MissingBlindingFactor(token.clone()))?;
        let (deal_key, proof) = build_winner_proof(auction_id, &entry.owner_public_key, &token, &r)?;
        let msg = self.authorize(Message::WinnerTokenReveal(proof))?;
        if let Some(s) = self.sessions.get_mut(&auction_id) {
            s.deal_key = Some(deal_key);
            s.phase = RevealPhase::AwaitingOwnerProof;
        }
        Ok(msg)
    }

    fn on_winner_proof(&mut self, msg: &WinnerTokenRevealMsg) -> Result<Option<Message>, AuctionError> {
        let auction_id = msg.auction_id;
        match self.sessions.get(&auction_id) {
            Some(s) if s.role == Role::Owner => s.expect(Role::Owner, RevealPhase::AwaitingWinnerProof)?,
            _ => return Ok(None),
        }
        let entry = self.projection.get(auction_id).cloned().ok_or(Rejection::UnknownAuction(auction_id))?;
        let expected = entry.winning_token.ok_or(RevealError::NoSession(auction_id))?;
        let ephemeral = self
            .keyring
            .get(&entry.creation_token)?
            .ok_or(RevealError::MissingAuctionKey(auction_id))?;
        let deal_key = open_winner_proof(msg, &ephemeral, &expected, &self.reveal_ctx()).inspect_err(|e| {
            warn!(auction_id, error = %e, "winner proof rejected");
        })?;
        info!(auction_id, "winner proved ownership of the winning bid");
        if let Some(s) = self.sessions.get_mut(&auction_id) {
            s.deal_key = Some(deal_key);
        }
        self.send_owner_proof(auction_id).map(Some)
    }

    fn send_owner_proof(&mut self, auction_id: u64) -> Result<Message, AuctionError> {
        let deal_key = self
            .sessions
            .get(&auction_id)
            .ok_or(RevealError::NoSession(auction_id))?
            .deal_key()?
            .clone();
        let entry = self.projection.get(auction_id).cloned().ok_or(Rejection::UnknownAuction(auction_id))?;
        let creation = entry.creation_token;
        let r = self
            .tokens
            .blinding_factor(&creation)?
            .ok_or_else(|| RevealError::MissingBlindingFactor(creation.clone()))?;
        let revelation = build_owner_revelation(auction_id, &deal_key, &creation, &r, &self.identity.certificate)?;
        let msg = self.authorize(Message::OwnerRevelation(revelation))?;
        if let Some(s) = self.sessions.get_mut(&auction_id) {
            s.phase = RevealPhase::AwaitingWinnerIdentity;
        }
        Ok(msg)
    }

    fn on_owner_revelation(&mut self, msg: &RevelationMsg) -> Result<Option<Message>, AuctionError> {
        let auction_id = msg.auction_id;
        let deal_key = match self.sessions.get(&auction_id) {
            Some(s) if s.role == Role::Winner => {
                s.expect(Role::Winner, RevealPhase::AwaitingOwnerProof)?;
                s.deal_key()?.clone()
            }
            _ => return Ok(None),
        };
        let entry = self.projection.get(auction_id).cloned().ok_or(Rejection::UnknownAuction(auction_id))?;
        let owner = open_owner_revelation(msg, &deal_key, &entry.creation_token, &self.reveal_ctx())
            .inspect_err(|e| warn!(auction_id, error = %e, "owner proof rejected"))?;
        let identity = build_winner_identity(auction_id, &deal_key, &self.identity.certificate)?;
        let reply = self.authorize(Message::WinnerRevelation(identity))?;
        self.sessions.remove(&auction_id);
        self.settle(Settlement { auction_id, role: Role::Winner, amount: entry.highest_bid, counterparty: owner })?;
        Ok(Some(reply))
    }

    fn on_winner_identity(&mut self, msg: &RevelationMsg) -> Result<Option<Message>, AuctionError> {
        let auction_id = msg.auction_id;
        let deal_key = match self.sessions.get(&auction_id) {
            Some(s) if s.role == Role::Owner => {
                s.expect(Role::Owner, RevealPhase::AwaitingWinnerIdentity)?;
                s.deal_key()?.clone()
            }
            _ => return Ok(None),
        };
        let amount = self.projection.get(auction_id).map_or(0, |e| e.highest_bid);
        let winner = open_winner_identity(msg, &deal_key, &self.reveal_ctx())
            .inspect_err(|e| warn!(auction_id, error = %e, "winner identity rejected"))?;
        self.sessions.remove(&auction_id);
        self.settle(Settlement { auction_id, role: Role::Owner, amount, counterparty: winner })?;
        Ok(None)
    }

    fn settle(&mut self, settlement: Settlement) -> Result<(), AuctionError> {
        info!(
            auction_id = settlement.auction_id,
            role = ?settlement.role,
            amount = settlement.amount,
            counterparty = %settlement.counterparty.display_name,
            "auction settled"
        );
        self.projection.mark_settled(settlement.auction_id);
        self.settlements.record(settlement)?;
        Ok(())
    }
}

fn log_rejection(msg: &Message, e: &AuctionError) {
    match e {
        AuctionError::Rejected(Rejection::AlreadyFinished(id)) => {
            debug!(auction_id = *id, "auctionEnd for finished auction ignored");
        }
        _ => warn!(kind = msg.kind(), error = %e, "message rejected"),
    }
}
