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

//! Veilbid anonymous tokens.
//!
//! Peers authorize every auction action with a single-use token: a random id
//! carrying an RSA signature from the authority, obtained through Chaum blind
//! signing so the authority cannot link issuance to later use. The crate also
//! holds the authority-side signer, the token wallet, the `Authority` seam,
//! PSS-signed timestamps and the minimal identity certificate.

pub mod authority;
pub mod blind;
pub mod client;
pub mod errors;
pub mod identity;
pub mod signer;
pub mod timestamp;
pub mod wallet;

pub use authority::{Authority, Registration, RegistrationRequest};
pub use blind::BlindRsa;
pub use client::{BlindTokenClient, Token, TokenRef};
pub use errors::{AuthorityError, CryptoError, TokenError, WalletError};
pub use identity::Certificate;
pub use signer::AuthoritySigner;
pub use timestamp::SignedTimestamp;
pub use wallet::{TokenWallet, WalletEntry};
