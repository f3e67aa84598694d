#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions,
    clippy::result_large_err
)]

//! Veilbid node.
//!
//! Runtime pieces around the auction protocol: the in-process authority
//! (`AuthorityContext`, `BoundedAuthority`), the `LocalHub` broadcast fan-out,
//! the threaded `PeerNode` actor, configuration and logging setup.

pub mod authority;
pub mod config;
pub mod demo;
pub mod errors;
pub mod logging;
pub mod node;
pub mod transport;

pub use authority::{AuthorityContext, BoundedAuthority};
pub use config::{AuthorityConfig, NodeConfig};
pub use errors::NodeError;
pub use node::{Command, PeerNode};
pub use transport::{Broadcast, LocalHub, PeerId};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
