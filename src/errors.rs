use thiserror::Error;
use veilbid_auction::{AuctionError, FrameError};
use veilbid_tokens::{AuthorityError, CryptoError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Auction(#[from] AuctionError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config decode: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown member {0}")]
    UnknownMember(String),

    #[error("node has shut down")]
    ShutDown,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}
