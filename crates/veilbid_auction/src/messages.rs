//! Wire envelope. Every variant except `new_key` carries a token and an
//! authority-signed timestamp.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veilbid_ledger::Block;
use veilbid_primitives::constants;
use veilbid_tokens::{SignedTimestamp, TokenRef};

use crate::sealed::Sealed;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionMsg {
    pub id: u64,
    pub name: String,
    pub min_bid: u64,
    /// RFC 3339.
    pub closing_date: String,
    /// SPKI PEM of the auction's ephemeral key.
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidMsg {
    pub auction_id: u64,
    pub bid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionEndMsg {
    pub auction_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

/// Winner → owner: wrapped deal key plus the sealed ownership proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerTokenRevealMsg {
    pub auction_id: u64,
    /// Deal key, RSA-OAEP wrapped under the auction's ephemeral key.
    pub deal_key: String,
    pub private_info: Sealed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

/// Sealed disclosure under the deal key (owner proof or winner identity).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevelationMsg {
    pub auction_id: u64,
    pub private_info: Sealed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRequestMsg {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerUpdateMsg {
    pub request_id: String,
    pub chain: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SignedTimestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKeyMsg {
    pub keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "auction")]
    Auction(AuctionMsg),
    #[serde(rename = "bid")]
    Bid(BidMsg),
    #[serde(rename = "auctionEnd")]
    AuctionEnd(AuctionEndMsg),
    #[serde(rename = "winner_token_reveal")]
    WinnerTokenReveal(WinnerTokenRevealMsg),
    #[serde(rename = "auction_owner_revelation")]
    OwnerRevelation(RevelationMsg),
    #[serde(rename = "winner_revelation")]
    WinnerRevelation(RevelationMsg),
    #[serde(rename = "ledger_request")]
    LedgerRequest(LedgerRequestMsg),
    #[serde(rename = "ledger_update")]
    LedgerUpdate(LedgerUpdateMsg),
    #[serde(rename = "new_key")]
    NewKey(NewKeyMsg),
}

impl Message {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auction(_) => constants::MSG_AUCTION,
            Self::Bid(_) => constants::MSG_BID,
            Self::AuctionEnd(_) => constants::MSG_AUCTION_END,
            Self::WinnerTokenReveal(_) => constants::MSG_WINNER_TOKEN_REVEAL,
            Self::OwnerRevelation(_) => constants::MSG_OWNER_REVELATION,
            Self::WinnerRevelation(_) => constants::MSG_WINNER_REVELATION,
            Self::LedgerRequest(_) => constants::MSG_LEDGER_REQUEST,
            Self::LedgerUpdate(_) => constants::MSG_LEDGER_UPDATE,
            Self::NewKey(_) => constants::MSG_NEW_KEY,
        }
    }

    #[must_use]
    pub const fn token(&self) -> Option<&TokenRef> {
        match self {
            Self::Auction(m) => m.token.as_ref(),
            Self::Bid(m) => m.token.as_ref(),
            Self::AuctionEnd(m) => m.token.as_ref(),
            Self::WinnerTokenReveal(m) => m.token.as_ref(),
            Self::OwnerRevelation(m) | Self::WinnerRevelation(m) => m.token.as_ref(),
            Self::LedgerRequest(m) => m.token.as_ref(),
            Self::LedgerUpdate(m) => m.token.as_ref(),
            Self::NewKey(_) => None,
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> Option<&SignedTimestamp> {
        match self {
            Self::Auction(m) => m.timestamp.as_ref(),
            Self::Bid(m) => m.timestamp.as_ref(),
            Self::AuctionEnd(m) => m.timestamp.as_ref(),
            Self::WinnerTokenReveal(m) => m.timestamp.as_ref(),
            Self::OwnerRevelation(m) | Self::WinnerRevelation(m) => m.timestamp.as_ref(),
            Self::LedgerRequest(m) => m.timestamp.as_ref(),
            Self::LedgerUpdate(m) => m.timestamp.as_ref(),
            Self::NewKey(_) => None,
        }
    }

    /// Attaches the authorization pair to a locally built message.
    pub fn sign_with(&mut self, token: TokenRef, timestamp: SignedTimestamp) {
        let (t, ts) = match self {
            Self::Auction(m) => (&mut m.token, &mut m.timestamp),
            Self::Bid(m) => (&mut m.token, &mut m.timestamp),
            Self::AuctionEnd(m) => (&mut m.token, &mut m.timestamp),
            Self::WinnerTokenReveal(m) => (&mut m.token, &mut m.timestamp),
            Self::OwnerRevelation(m) | Self::WinnerRevelation(m) => (&mut m.token, &mut m.timestamp),
            Self::LedgerRequest(m) => (&mut m.token, &mut m.timestamp),
            Self::LedgerUpdate(m) => (&mut m.token, &mut m.timestamp),
            Self::NewKey(_) => return,
        };
        *t = Some(token);
        *ts = Some(timestamp);
    }

    #[must_use]
    pub const fn auction_id(&self) -> Option<u64> {
        match self {
            Self::Auction(m) => Some(m.id),
            Self::Bid(m) => Some(m.auction_id),
            Self::AuctionEnd(m) => Some(m.auction_id),
            Self::WinnerTokenReveal(m) => Some(m.auction_id),
            Self::OwnerRevelation(m) | Self::WinnerRevelation(m) => Some(m.auction_id),
            Self::LedgerRequest(_) | Self::LedgerUpdate(_) | Self::NewKey(_) => None,
        }
    }

    /// Control messages are authorized like any other but never enter the chain.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, Self::LedgerRequest(_) | Self::LedgerUpdate(_))
    }

    pub fn to_event(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_event(event: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_discriminators() {
        let bid = Message::Bid(BidMsg { auction_id: 3, bid: 150, token: None, timestamp: None });
        let v = bid.to_event().unwrap();
        assert_eq!(v, json!({"type": "bid", "auction_id": 3, "bid": 150}));
        assert_eq!(Message::from_event(&v).unwrap(), bid);

        let end: Message =
            serde_json::from_value(json!({"type": "auctionEnd", "auction_id": 1})).unwrap();
        assert_eq!(end.kind(), "auctionEnd");
        assert_eq!(end.auction_id(), Some(1));
    }

    #[test]
    fn sign_with_fills_token_and_timestamp() {
        let mut m = Message::AuctionEnd(AuctionEndMsg { auction_id: 1, token: None, timestamp: None });
        m.sign_with(
            TokenRef { token_id: "t".into(), token_sig: "AA==".into() },
            SignedTimestamp { timestamp: "2025-01-01T00:00:00Z".into(), signature: "AA==".into() },
        );
        assert_eq!(m.token().unwrap().token_id, "t");
        assert!(m.timestamp().is_some());
        let v = m.to_event().unwrap();
        assert_eq!(v["token"]["token_id"], "t");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_value::<Message>(json!({"type": "auction_cancel"})).is_err());
    }
}
