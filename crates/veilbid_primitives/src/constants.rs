#![forbid(unsafe_code)]

pub const GENESIS_PREV_HASH: &str = "0";
pub const GENESIS_HEIGHT: u64 = 0;
pub const GENESIS_EVENT_TYPE: &str = "genesis";
pub const GENESIS_DESCRIPTION: &str = "Ledger initialized";

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1;

pub const TAG_TOKEN_ID: &str = "veilbid.token.v1";

pub const DEAL_KEY_LEN: usize = 32;
pub const GROUP_KEY_LEN: usize = 32;
pub const GCM_NONCE_LEN: usize = 12;

pub const CLOSING_CHECK_INTERVAL_SECS: u64 = 10;
/// Largest accepted gap between a message's authority timestamp and the local clock.
pub const DEFAULT_MAX_TIMESTAMP_SKEW_SECS: i64 = 30;

// Wire discriminators (the `type` field of every envelope)
pub const MSG_AUCTION: &str = "auction";
pub const MSG_BID: &str = "bid";
pub const MSG_AUCTION_END: &str = "auctionEnd";
pub const MSG_WINNER_TOKEN_REVEAL: &str = "winner_token_reveal";
pub const MSG_OWNER_REVELATION: &str = "auction_owner_revelation";
pub const MSG_WINNER_REVELATION: &str = "winner_revelation";
pub const MSG_LEDGER_REQUEST: &str = "ledger_request";
pub const MSG_LEDGER_UPDATE: &str = "ledger_update";
pub const MSG_NEW_KEY: &str = "new_key";
