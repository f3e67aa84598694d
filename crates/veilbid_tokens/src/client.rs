use rand_core::OsRng;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use veilbid_primitives::now_iso;

use crate::authority::Authority;
use crate::blind::{to_decimal, BlindRsa};
use crate::errors::{CryptoError, TokenError, WalletError};
use crate::wallet::{TokenWallet, WalletEntry};

/// A minted anonymous token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub token_id: String,
    pub blinding_factor: BigUint,
    pub blinded_value: BigUint,
    pub signature: BigUint,
}

/// What a message carries: the token id and its unblinded signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    pub token_id: String,
    pub token_sig: String,
}

impl TokenRef {
    /// Shape check only: non-empty id and a base64 signature.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.token_id.is_empty()
            && !self.token_sig.is_empty()
            && veilbid_primitives::b64d(&self.token_sig).is_ok()
    }
}

pub struct BlindTokenClient {
    identity: String,
    rsa: BlindRsa,
    wallet: TokenWallet,
}

impl BlindTokenClient {
    #[must_use]
    pub fn new(identity: &str, authority_key: &RsaPublicKey, wallet: TokenWallet) -> Self {
        Self { identity: identity.to_owned(), rsa: BlindRsa::from_public_key(authority_key), wallet }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub const fn rsa(&self) -> &BlindRsa {
        &self.rsa
    }

    #[must_use]
    pub const fn wallet(&self) -> &TokenWallet {
        &self.wallet
    }

    /// Blind, get signed, unblind, verify, persist.
    #[instrument(level = "debug", skip_all, fields(identity = %self.identity))]
    pub fn mint_token(&mut self, authority: &dyn Authority) -> Result<TokenRef, TokenError> {
        let token = self.mint(authority)?;
        let token_sig = self.rsa.encode(&token.signature)?;
        self.wallet.insert(WalletEntry {
            token_id: token.token_id.clone(),
            blinding_factor: to_decimal(&token.blinding_factor),
            signature: token_sig.clone(),
            issued_at: now_iso(),
        })?;
        debug!(token_id = %token.token_id, "token minted");
        Ok(TokenRef { token_id: token.token_id, token_sig })
    }

    fn mint(&self, authority: &dyn Authority) -> Result<Token, TokenError> {
        let r = self.rsa.random_blinding_factor(&mut OsRng);
        let token_id = self.rsa.derive_token_id(&r)?;
        let blinded_value = self.rsa.blind(&token_id, &r)?;

        authority.issue_quota(&self.identity)?;
        let blind_sig_b64 = authority.blind_sign(&self.identity, &self.rsa.encode(&blinded_value)?)?;
        let blind_sig = self.rsa.decode(&blind_sig_b64)?;
        let signature = self.rsa.unblind(&blind_sig, &r)?;

        if !self.rsa.verify(&token_id, &signature) {
            warn!("authority returned a signature that does not verify after unblinding");
            return Err(CryptoError::InvalidSignature.into());
        }
        Ok(Token { token_id, blinding_factor: r, blinded_value, signature })
    }

    #[must_use]
    pub fn verify_token(&self, token: &TokenRef) -> bool {
        self.rsa.verify_b64(&token.token_id, &token.token_sig)
    }

    /// The blinding factor of a token this wallet minted.
    pub fn blinding_factor(&self, token_id: &str) -> Result<Option<BigUint>, WalletError> {
        self.wallet.get(token_id).map(WalletEntry::blinding_factor).transpose()
    }
}
