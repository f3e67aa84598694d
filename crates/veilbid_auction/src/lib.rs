#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions,
    clippy::result_large_err
)]

//! Veilbid auction protocol.
//!
//! Wire messages, the deterministic auction projection over the ledger, the
//! per-peer acceptance pipeline (`AuctionPeer`), the closing monitor step,
//! ledger synchronization, group-key framing and the two-phase winner/owner
//! identity reveal.

pub mod errors;
pub mod group_key;
pub mod keyring;
pub mod machine;
pub mod messages;
pub mod projection;
pub mod reveal;
pub mod sealed;
pub mod settlements;

pub use errors::{AuctionError, FrameError, KeyringError, Rejection, RevealError, SettlementError};
pub use group_key::GroupKey;
pub use keyring::Keyring;
pub use machine::{AuctionPeer, Dispatch, PeerIdentity, PeerSettings, PeerStores};
pub use messages::Message;
pub use projection::{project, AuctionEntry, AuctionState, Projection};
pub use reveal::{RevealPhase, RevealSession, Role, Settlement};
pub use sealed::{Sealed, SymmetricKey};
pub use settlements::SettlementBook;
