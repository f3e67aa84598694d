//! In-memory view of auctions, folded from accepted events.
//!
//! The projection is never authoritative: it can always be rebuilt from the
//! ledger with [`project`]. Type rules live here so that live acceptance and
//! rebuilds agree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use veilbid_primitives::parse_iso;

use crate::errors::Rejection;
use crate::messages::{AuctionEndMsg, AuctionMsg, BidMsg, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuctionState {
    Open,
    /// Owner-local: the closing monitor is trying to publish `auctionEnd`.
    Closing,
    Closed,
    RevealPending,
    Settled,
}

impl AuctionState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Closed | Self::RevealPending | Self::Settled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuctionEntry {
    pub id: u64,
    pub name: String,
    pub min_bid: u64,
    /// Starts at `min_bid`; `winning_token` tells whether anyone has bid.
    pub highest_bid: u64,
    pub highest_bidder_is_local: bool,
    pub closing_time: DateTime<Utc>,
    pub state: AuctionState,
    pub owner_public_key: String,
    pub winning_token: Option<String>,
    pub last_bid_timestamp: Option<DateTime<Utc>>,
    pub creation_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MyAuction {
    pub created_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub next_auction_id: u64,
    pub auctions: BTreeMap<u64, AuctionEntry>,
    pub my_auctions: BTreeMap<u64, MyAuction>,
}

impl Projection {
    #[must_use]
    pub fn new() -> Self {
        Self { next_auction_id: 1, ..Self::default() }
    }

    #[must_use]
    pub fn get(&self, auction_id: u64) -> Option<&AuctionEntry> {
        self.auctions.get(&auction_id)
    }

    #[must_use]
    pub fn is_mine(&self, auction_id: u64) -> bool {
        self.my_auctions.contains_key(&auction_id)
    }

    fn entry(&self, auction_id: u64) -> Result<&AuctionEntry, Rejection> {
        self.auctions.get(&auction_id).ok_or(Rejection::UnknownAuction(auction_id))
    }

    fn entry_mut(&mut self, auction_id: u64) -> Result<&mut AuctionEntry, Rejection> {
        self.auctions.get_mut(&auction_id).ok_or(Rejection::UnknownAuction(auction_id))
    }

    pub fn check_auction(&self, msg: &AuctionMsg) -> Result<DateTime<Utc>, Rejection> {
        if msg.id == u64::MAX {
            return Err(Rejection::Malformed(format!("auction id {} is out of range", msg.id)));
        }
        if self.auctions.contains_key(&msg.id) {
            return Err(Rejection::DuplicateAuction(msg.id));
        }
        parse_iso(&msg.closing_date).map_err(|e| Rejection::Malformed(format!("closing_date: {e}")))
    }

    /// `owned`: the creation token is in the local wallet.
    pub fn apply_auction(&mut self, msg: &AuctionMsg, owned: bool) -> Result<(), Rejection> {
        let closing_time = self.check_auction(msg)?;
        let creation_token = msg.token.as_ref().map(|t| t.token_id.clone()).unwrap_or_default();
        self.auctions.insert(
            msg.id,
            AuctionEntry {
                id: msg.id,
                name: msg.name.clone(),
                min_bid: msg.min_bid,
                highest_bid: msg.min_bid,
                highest_bidder_is_local: false,
                closing_time,
                state: AuctionState::Open,
                owner_public_key: msg.public_key.clone(),
                winning_token: None,
                last_bid_timestamp: None,
                creation_token: creation_token.clone(),
            },
        );
        if owned {
            self.my_auctions.insert(msg.id, MyAuction { created_token: creation_token });
        }
        self.next_auction_id = self.next_auction_id.max(msg.id.saturating_add(1));
        Ok(())
    }

    /// Bid ordering: first bid must reach `min_bid`; later ones must beat the
    /// highest, or match it with an earlier trusted timestamp.
    pub fn check_bid(&self, msg: &BidMsg, at: DateTime<Utc>) -> Result<(), Rejection> {
        let entry = self.entry(msg.auction_id)?;
        if !matches!(entry.state, AuctionState::Open | AuctionState::Closing) || at >= entry.closing_time {
            return Err(Rejection::AuctionClosed(msg.auction_id));
        }
        let accepted = match (&entry.winning_token, entry.last_bid_timestamp) {
            (None, _) => msg.bid >= entry.min_bid,
            (Some(_), Some(prev_at)) => {
                msg.bid > entry.highest_bid || (msg.bid == entry.highest_bid && at < prev_at)
            }
            (Some(_), None) => msg.bid > entry.highest_bid,
        };
        if !accepted {
            return Err(Rejection::BidTooLow {
                auction_id: msg.auction_id,
                bid: msg.bid,
                highest: entry.highest_bid,
            });
        }
        Ok(())
    }

    /// Live acceptance also consults the local clock: a bid carrying an old
    /// but valid timestamp is still refused once `closing_time` has passed.
    pub fn check_bidding_open(&self, auction_id: u64, now: DateTime<Utc>) -> Result<(), Rejection> {
        if now >= self.entry(auction_id)?.closing_time {
            return Err(Rejection::AuctionClosed(auction_id));
        }
        Ok(())
    }

    pub fn apply_bid(&mut self, msg: &BidMsg, at: DateTime<Utc>, owned: bool) -> Result<(), Rejection> {
        self.check_bid(msg, at)?;
        let entry = self.entry_mut(msg.auction_id)?;
        entry.highest_bid = msg.bid;
        entry.highest_bidder_is_local = owned;
        entry.winning_token = msg.token.as_ref().map(|t| t.token_id.clone());
        entry.last_bid_timestamp = Some(at);
        Ok(())
    }

    /// `AlreadyFinished` means "ignore, do not append".
    pub fn check_auction_end(&self, msg: &AuctionEndMsg, at: DateTime<Utc>) -> Result<(), Rejection> {
        let entry = self.entry(msg.auction_id)?;
        if entry.state.is_finished() {
            return Err(Rejection::AlreadyFinished(msg.auction_id));
        }
        if at < entry.closing_time {
            return Err(Rejection::PrematureClose(msg.auction_id));
        }
        Ok(())
    }

    pub fn apply_auction_end(&mut self, msg: &AuctionEndMsg, at: DateTime<Utc>) -> Result<(), Rejection> {
        self.check_auction_end(msg, at)?;
        self.entry_mut(msg.auction_id)?.state = AuctionState::Closed;
        Ok(())
    }

    pub fn check_reveal(&self, auction_id: u64) -> Result<(), Rejection> {
        if !self.entry(auction_id)?.state.is_finished() {
            return Err(Rejection::NotFinished(auction_id));
        }
        Ok(())
    }

    /// Reveal traffic moves a finished auction to `RevealPending`. Anyone can
    /// publish it, so it never settles an auction; see [`Self::mark_settled`].
    pub fn apply_reveal(&mut self, msg: &Message) -> Result<(), Rejection> {
        let Some(auction_id) = msg.auction_id() else {
            return Err(Rejection::Malformed(format!("{} has no auction id", msg.kind())));
        };
        self.check_reveal(auction_id)?;
        let entry = self.entry_mut(auction_id)?;
        if entry.state != AuctionState::Settled {
            entry.state = AuctionState::RevealPending;
        }
        Ok(())
    }

    /// Local transition taken when this peer completes the reveal.
    pub fn mark_settled(&mut self, auction_id: u64) {
        if let Some(e) = self.auctions.get_mut(&auction_id) {
            e.state = AuctionState::Settled;
        }
    }

    /// Owner-local transition taken by the closing monitor.
    pub fn mark_closing(&mut self, auction_id: u64) {
        if let Some(e) = self.auctions.get_mut(&auction_id) {
            if e.state == AuctionState::Open {
                e.state = AuctionState::Closing;
            }
        }
    }

    /// Type rules for an already-authorized message.
    pub fn apply(&mut self, msg: &Message, at: DateTime<Utc>, owns: &dyn Fn(&str) -> bool) -> Result<(), Rejection> {
        let owned = msg.token().is_some_and(|t| owns(&t.token_id));
        match msg {
            Message::Auction(m) => self.apply_auction(m, owned),
            Message::Bid(m) => self.apply_bid(m, at, owned),
            Message::AuctionEnd(m) => self.apply_auction_end(m, at),
            Message::WinnerTokenReveal(_) | Message::OwnerRevelation(_) | Message::WinnerRevelation(_) => {
                self.apply_reveal(msg)
            }
            Message::LedgerRequest(_) | Message::LedgerUpdate(_) | Message::NewKey(_) => Ok(()),
        }
    }
}

/// Rebuilds the projection from ledger events. Events are trusted (they were
/// authorized on entry); ones that break a type rule are skipped.
pub fn project<'a>(events: impl IntoIterator<Item = &'a Value>, owns: &dyn Fn(&str) -> bool) -> Projection {
    let mut projection = Projection::new();
    for event in events {
        let Ok(msg) = Message::from_event(event) else {
            debug!("skipping undecodable ledger event");
            continue;
        };
        let Some(at) = msg.timestamp().and_then(|ts| parse_iso(&ts.timestamp).ok()) else {
            debug!(kind = msg.kind(), "skipping ledger event without timestamp");
            continue;
        };
        if let Err(r) = projection.apply(&msg, at, owns) {
            debug!(kind = msg.kind(), reason = %r, "ledger event skipped during rebuild");
        }
    }
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RevelationMsg;
    use chrono::Duration;
    use veilbid_tokens::TokenRef;

    fn tok(id: &str) -> Option<TokenRef> {
        Some(TokenRef { token_id: id.into(), token_sig: "AA==".into() })
    }

    fn auction(p: &mut Projection, closing: DateTime<Utc>) {
        let msg = AuctionMsg {
            id: 1,
            name: "lamp".into(),
            min_bid: 100,
            closing_date: veilbid_primitives::to_iso(&closing),
            public_key: "pk".into(),
            token: tok("create"),
            timestamp: None,
        };
        p.apply_auction(&msg, false).unwrap();
    }

    fn bid(amount: u64, token: &str) -> BidMsg {
        BidMsg { auction_id: 1, bid: amount, token: tok(token), timestamp: None }
    }

    #[test]
    fn bid_sequence_keeps_first_highest() {
        let t0 = Utc::now();
        let mut p = Projection::new();
        auction(&mut p, t0 + Duration::hours(1));
        let mut results = Vec::new();
        for (i, amount) in [100u64, 150, 120, 150].into_iter().enumerate() {
            let at = t0 + Duration::seconds(i64::try_from(i).unwrap());
            results.push(p.apply_bid(&bid(amount, &format!("b{i}")), at, false).is_ok());
        }
        assert_eq!(results, vec![true, true, false, false]);
        let e = p.get(1).unwrap();
        assert_eq!(e.highest_bid, 150);
        assert_eq!(e.winning_token.as_deref(), Some("b1"));
    }

    #[test]
    fn equal_bid_with_earlier_timestamp_wins_tie() {
        let t0 = Utc::now();
        let mut p = Projection::new();
        auction(&mut p, t0 + Duration::hours(1));
        p.apply_bid(&bid(150, "late"), t0 + Duration::seconds(10), false).unwrap();
        p.apply_bid(&bid(150, "early"), t0 + Duration::seconds(5), true).unwrap();
        let e = p.get(1).unwrap();
        assert_eq!(e.winning_token.as_deref(), Some("early"));
        assert!(e.highest_bidder_is_local);
    }

    #[test]
    fn first_bid_below_minimum_is_rejected() {
        let t0 = Utc::now();
        let mut p = Projection::new();
        auction(&mut p, t0 + Duration::hours(1));
        assert!(matches!(p.apply_bid(&bid(99, "x"), t0, false), Err(Rejection::BidTooLow { .. })));
    }

    #[test]
    fn closing_rules() {
        let t0 = Utc::now();
        let closing = t0 + Duration::minutes(5);
        let mut p = Projection::new();
        auction(&mut p, closing);
        let end = AuctionEndMsg { auction_id: 1, token: tok("end"), timestamp: None };

        assert!(matches!(p.apply_auction_end(&end, t0), Err(Rejection::PrematureClose(1))));
        assert!(matches!(p.apply_bid(&bid(500, "b"), closing, false), Err(Rejection::AuctionClosed(1))));
        p.apply_auction_end(&end, closing).unwrap();
        assert_eq!(p.get(1).unwrap().state, AuctionState::Closed);
        assert!(matches!(p.apply_auction_end(&end, closing), Err(Rejection::AlreadyFinished(1))));
        assert!(matches!(
            p.apply_bid(&bid(500, "b2"), t0, false),
            Err(Rejection::AuctionClosed(1))
        ));
    }

    #[test]
    fn duplicate_and_unknown_auctions() {
        let mut p = Projection::new();
        auction(&mut p, Utc::now());
        assert_eq!(p.next_auction_id, 2);
        let dup = AuctionMsg {
            id: 1,
            name: "again".into(),
            min_bid: 1,
            closing_date: veilbid_primitives::now_iso(),
            public_key: "pk".into(),
            token: tok("c2"),
            timestamp: None,
        };
        assert!(matches!(p.apply_auction(&dup, false), Err(Rejection::DuplicateAuction(1))));
        let stray = BidMsg { auction_id: 9, bid: 1, token: tok("s"), timestamp: None };
        assert!(matches!(p.apply_bid(&stray, Utc::now(), false), Err(Rejection::UnknownAuction(9))));
    }

    #[test]
    fn top_of_range_auction_id_is_refused() {
        let mut p = Projection::new();
        let msg = AuctionMsg {
            id: u64::MAX,
            name: "edge".into(),
            min_bid: 1,
            closing_date: veilbid_primitives::now_iso(),
            public_key: "pk".into(),
            token: tok("c"),
            timestamp: None,
        };
        assert!(matches!(p.apply_auction(&msg, false), Err(Rejection::Malformed(_))));
        assert!(p.auctions.is_empty());

        let below = AuctionMsg { id: u64::MAX - 1, ..msg };
        p.apply_auction(&below, false).unwrap();
        assert_eq!(p.next_auction_id, u64::MAX);
    }

    #[test]
    fn bidding_closes_on_the_local_clock_too() {
        let t0 = Utc::now();
        let closing = t0 + Duration::minutes(5);
        let mut p = Projection::new();
        auction(&mut p, closing);
        p.check_bidding_open(1, t0).unwrap();
        assert!(matches!(p.check_bidding_open(1, closing), Err(Rejection::AuctionClosed(1))));
        assert!(matches!(p.check_bidding_open(2, t0), Err(Rejection::UnknownAuction(2))));
    }

    #[test]
    fn reveal_traffic_never_settles() {
        let t0 = Utc::now();
        let mut p = Projection::new();
        auction(&mut p, t0);
        let end = AuctionEndMsg { auction_id: 1, token: tok("end"), timestamp: None };
        p.apply_auction_end(&end, t0).unwrap();

        let junk = Message::WinnerRevelation(RevelationMsg {
            auction_id: 1,
            private_info: crate::sealed::Sealed { nonce: "AA==".into(), ciphertext: "AA==".into() },
            token: tok("r"),
            timestamp: None,
        });
        p.apply_reveal(&junk).unwrap();
        assert_eq!(p.get(1).unwrap().state, AuctionState::RevealPending);

        p.mark_settled(1);
        p.apply_reveal(&junk).unwrap();
        assert_eq!(p.get(1).unwrap().state, AuctionState::Settled);
    }

    #[test]
    fn reveal_requires_finished_auction() {
        let mut p = Projection::new();
        let t0 = Utc::now();
        auction(&mut p, t0);
        assert!(matches!(p.check_reveal(1), Err(Rejection::NotFinished(1))));
        p.mark_closing(1);
        assert_eq!(p.get(1).unwrap().state, AuctionState::Closing);
        let end = AuctionEndMsg { auction_id: 1, token: tok("end"), timestamp: None };
        p.apply_auction_end(&end, t0).unwrap();
        p.check_reveal(1).unwrap();
    }
}
