//! Two-phase winner/owner identity reveal.
//!
//! Phase 1, winner → owner: a fresh deal key wrapped under the auction's
//! ephemeral key, plus `{token id, r}` of the winning bid sealed under it.
//! Phase 2, owner → winner: `{creation token id, r, certificate}` sealed under
//! the deal key. The winner closes with its own sealed certificate.
//!
//! Each step verifies the disclosed `r` against the token signature recorded
//! in the ledger before revealing anything in return.

use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use veilbid_ledger::Ledger;
use veilbid_tokens::blind::{from_decimal, to_decimal};
use veilbid_tokens::{BlindRsa, Certificate, CryptoError};

use crate::errors::RevealError;
use crate::messages::{RevelationMsg, WinnerTokenRevealMsg};
use crate::sealed::SymmetricKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Winner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RevealPhase {
    /// Winner: phase 1 not yet published. Owner: waiting for it.
    AwaitingWinnerProof,
    AwaitingOwnerProof,
    AwaitingWinnerIdentity,
    Complete,
}

impl RevealPhase {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AwaitingWinnerProof => "awaiting-winner-proof",
            Self::AwaitingOwnerProof => "awaiting-owner-proof",
            Self::AwaitingWinnerIdentity => "awaiting-winner-identity",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevealSession {
    pub auction_id: u64,
    pub role: Role,
    pub deal_key: Option<SymmetricKey>,
    pub phase: RevealPhase,
}

impl RevealSession {
    #[must_use]
    pub const fn new(auction_id: u64, role: Role) -> Self {
        Self { auction_id, role, deal_key: None, phase: RevealPhase::AwaitingWinnerProof }
    }

    pub fn expect(&self, role: Role, phase: RevealPhase) -> Result<(), RevealError> {
        if self.role != role || self.phase != phase {
            return Err(RevealError::OutOfPhase { auction_id: self.auction_id, phase: self.phase.name() });
        }
        Ok(())
    }

    pub fn deal_key(&self) -> Result<&SymmetricKey, RevealError> {
        self.deal_key
            .as_ref()
            .ok_or(RevealError::OutOfPhase { auction_id: self.auction_id, phase: self.phase.name() })
    }
}

/// Outcome of a completed reveal: who is on the other side of the deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub auction_id: u64,
    pub role: Role,
    pub amount: u64,
    pub counterparty: Certificate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerProof {
    pub token_winner_bid_id: String,
    pub blinding_factor_r: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerProof {
    pub token_auction_id: String,
    pub blinding_factor_r: String,
    pub certificate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityPackage {
    pub certificate: String,
}

/// What a reveal step needs to check a disclosure.
pub struct RevealContext<'a> {
    pub ledger: &'a Ledger,
    pub rsa: &'a BlindRsa,
    pub authority_key: &'a RsaPublicKey,
    pub now: DateTime<Utc>,
}

impl RevealContext<'_> {
    /// `(token_id, r)` must match the signature the ledger holds for `token_id`.
    pub fn verify_disclosure(&self, token_id: &str, r_decimal: &str) -> Result<(), RevealError> {
        let sig_b64 = self
            .ledger
            .find_token_signature(token_id)
            .ok_or_else(|| RevealError::UnknownToken(token_id.to_owned()))?;
        let sig = self.rsa.decode(sig_b64)?;
        let r = from_decimal(r_decimal)?;
        self.rsa.verify_blinding(token_id, &r, &sig)?;
        Ok(())
    }

    pub fn verify_certificate(&self, proof: &str) -> Result<Certificate, RevealError> {
        let cert = Certificate::from_proof(proof)?;
        cert.verify(self.authority_key, &self.now)?;
        Ok(cert)
    }
}

fn expect_token(expected: &str, got: &str) -> Result<(), RevealError> {
    if expected != got {
        return Err(RevealError::TokenMismatch { expected: expected.to_owned(), got: got.to_owned() });
    }
    Ok(())
}

/// Phase 1 payload, unsigned. Returns the deal key the winner must keep.
pub fn build_winner_proof(
    auction_id: u64,
    owner_public_key_pem: &str,
    winning_token: &str,
    r: &BigUint,
) -> Result<(SymmetricKey, WinnerTokenRevealMsg), RevealError> {
    let owner_key = RsaPublicKey::from_public_key_pem(owner_public_key_pem)
        .map_err(|e| CryptoError::Key(e.to_string()))?;
    let deal_key = SymmetricKey::generate();
    let private_info = deal_key.seal_json(&WinnerProof {
        token_winner_bid_id: winning_token.to_owned(),
        blinding_factor_r: to_decimal(r),
    })?;
    let msg = WinnerTokenRevealMsg {
        auction_id,
        deal_key: deal_key.wrap(&owner_key)?,
        private_info,
        token: None,
        timestamp: None,
    };
    Ok((deal_key, msg))
}

/// Owner side of phase 1. Returns the deal key once the winner proved ownership
/// of `expected_token`.
pub fn open_winner_proof(
    msg: &WinnerTokenRevealMsg,
    ephemeral: &RsaPrivateKey,
    expected_token: &str,
    ctx: &RevealContext<'_>,
) -> Result<SymmetricKey, RevealError> {
    let deal_key = SymmetricKey::unwrap_with(&msg.deal_key, ephemeral)?;
    let proof: WinnerProof = deal_key.open_json(&msg.private_info)?;
    expect_token(expected_token, &proof.token_winner_bid_id)?;
    ctx.verify_disclosure(&proof.token_winner_bid_id, &proof.blinding_factor_r)?;
    Ok(deal_key)
}

pub fn build_owner_revelation(
    auction_id: u64,
    deal_key: &SymmetricKey,
    creation_token: &str,
    r: &BigUint,
    certificate: &Certificate,
) -> Result<RevelationMsg, RevealError> {
    let private_info = deal_key.seal_json(&OwnerProof {
        token_auction_id: creation_token.to_owned(),
        blinding_factor_r: to_decimal(r),
        certificate: certificate.to_proof()?,
    })?;
    Ok(RevelationMsg { auction_id, private_info, token: None, timestamp: None })
}

/// Winner side of phase 2: the owner must prove it created the auction.
pub fn open_owner_revelation(
    msg: &RevelationMsg,
    deal_key: &SymmetricKey,
    expected_creation_token: &str,
    ctx: &RevealContext<'_>,
) -> Result<Certificate, RevealError> {
    let proof: OwnerProof = deal_key.open_json(&msg.private_info)?;
    expect_token(expected_creation_token, &proof.token_auction_id)?;
    ctx.verify_disclosure(&proof.token_auction_id, &proof.blinding_factor_r)?;
    ctx.verify_certificate(&proof.certificate)
}

pub fn build_winner_identity(
    auction_id: u64,
    deal_key: &SymmetricKey,
    certificate: &Certificate,
) -> Result<RevelationMsg, RevealError> {
    let private_info = deal_key.seal_json(&IdentityPackage { certificate: certificate.to_proof()? })?;
    Ok(RevelationMsg { auction_id, private_info, token: None, timestamp: None })
}

pub fn open_winner_identity(
    msg: &RevelationMsg,
    deal_key: &SymmetricKey,
    ctx: &RevealContext<'_>,
) -> Result<Certificate, RevealError> {
    let package: IdentityPackage = deal_key.open_json(&msg.private_info)?;
    ctx.verify_certificate(&package.certificate)
}
