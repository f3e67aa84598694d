use thiserror::Error;
use veilbid_ledger::{ChainFault, LedgerError};
use veilbid_tokens::{AuthorityError, CryptoError, TokenError, WalletError};

/// Protocol violations. The message is dropped and logged; nothing is sent back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("message carries no token")]
    MissingToken,
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature does not verify")]
    InvalidTokenSignature,
    #[error("token {0} already spent")]
    DoubleSpend(String),
    #[error("message carries no authority timestamp")]
    MissingTimestamp,
    #[error("authority timestamp does not verify")]
    UntrustedTimestamp,
    #[error("authority timestamp {0} is too far from the local clock")]
    StaleTimestamp(String),
    #[error("unknown auction {0}")]
    UnknownAuction(u64),
    #[error("auction {0} already exists")]
    DuplicateAuction(u64),
    #[error("auction {0} is not accepting bids")]
    AuctionClosed(u64),
    #[error("bid {bid} does not beat {highest} on auction {auction_id}")]
    BidTooLow { auction_id: u64, bid: u64, highest: u64 },
    #[error("auction {0} cannot close before its closing date")]
    PrematureClose(u64),
    #[error("auction {0} already finished")]
    AlreadyFinished(u64),
    #[error("auction {0} has not finished")]
    NotFinished(u64),
    #[error("malformed field: {0}")]
    Malformed(String),
    #[error("remote chain rejected: {0}")]
    RemoteChain(String),
    #[error("no outstanding ledger request {0}")]
    UnsolicitedUpdate(String),
}

/// Failures of one reveal step. The session stays in place.
#[derive(Debug, Error)]
pub enum RevealError {
    #[error("no reveal session for auction {0}")]
    NoSession(u64),
    #[error("reveal for auction {auction_id} arrived out of phase ({phase})")]
    OutOfPhase { auction_id: u64, phase: &'static str },
    #[error("no ephemeral key for auction {0}")]
    MissingAuctionKey(u64),
    #[error("disclosed token {got} is not the expected {expected}")]
    TokenMismatch { expected: String, got: String },
    #[error("no ledger signature for token {0}")]
    UnknownToken(String),
    #[error("local blinding factor for {0} is missing")]
    MissingBlindingFactor(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no group key")]
    NoGroupKey,
    #[error("frame encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement book io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settlement book encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("keyring io: {0}")]
    Io(#[from] std::io::Error),
    #[error("keyring encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("keyring entry {0}: {1}")]
    Key(String, String),
}

/// Errors surfaced to the caller of a peer operation.
#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("reveal failed: {0}")]
    Reveal(#[from] RevealError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
    #[error(transparent)]
    Settlements(#[from] SettlementError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("event encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot bid on own auction {0}")]
    OwnAuction(u64),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<ChainFault> for Rejection {
    fn from(f: ChainFault) -> Self {
        Self::RemoteChain(f.to_string())
    }
}
