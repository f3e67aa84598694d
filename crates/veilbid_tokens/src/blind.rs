//! Chaum blind RSA over the authority's raw key parts.
//!
//! `m = H(token_id) mod n`, blinded `m' = m * r^e mod n`, unblinded
//! `s = s' * r^{-1} mod n`. No padding is applied; the hash reduction is the
//! whole message encoding.

use num_bigint_dig::{BigInt, Sign};
use rand_core::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use veilbid_primitives::{b64d, b64e, constants::TAG_TOKEN_ID, ct_eq_bytes, h_tag, i2osp, sha256};

use crate::errors::CryptoError;

/// Public half of the blind-signature scheme: everything a peer needs to
/// blind, unblind and verify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindRsa {
    n: BigUint,
    e: BigUint,
    modulus_len: usize,
}

impl BlindRsa {
    #[must_use]
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        Self { n: key.n().clone(), e: key.e().clone(), modulus_len: key.size() }
    }

    #[must_use]
    pub const fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// Modulus width in bytes; every encoded integer uses exactly this width.
    #[must_use]
    pub const fn modulus_len(&self) -> usize {
        self.modulus_len
    }

    /// `H(token_id) mod n`, SHA-256 over the UTF-8 id read big-endian.
    #[must_use]
    pub fn hash_to_int(&self, token_id: &str) -> BigUint {
        BigUint::from_bytes_be(&sha256(token_id.as_bytes())) % &self.n
    }

    /// Uniform `r` in `[1, n)` coprime to `n`. Non-invertible draws are retried.
    pub fn random_blinding_factor<R: RngCore + CryptoRng>(&self, rng: &mut R) -> BigUint {
        let zero = BigUint::from(0u32);
        // Eight extra bytes keep the modular reduction bias negligible.
        let mut buf = vec![0u8; self.modulus_len + 8];
        loop {
            rng.fill_bytes(&mut buf);
            let r = BigUint::from_bytes_be(&buf) % &self.n;
            if r != zero && mod_inverse(&r, &self.n).is_some() {
                return r;
            }
        }
    }

    /// `hex(SHA-256("veilbid.token.v1" || I2OSP(r, k)))`.
    pub fn derive_token_id(&self, r: &BigUint) -> Result<String, CryptoError> {
        let r_bytes = i2osp(&r.to_bytes_be(), self.modulus_len)?;
        Ok(hex::encode(h_tag(TAG_TOKEN_ID, &[&r_bytes])))
    }

    pub fn blind(&self, token_id: &str, r: &BigUint) -> Result<BigUint, CryptoError> {
        self.check_blinding_factor(r)?;
        let m = self.hash_to_int(token_id);
        Ok((m * r.modpow(&self.e, &self.n)) % &self.n)
    }

    pub fn unblind(&self, blind_sig: &BigUint, r: &BigUint) -> Result<BigUint, CryptoError> {
        if blind_sig >= &self.n {
            return Err(CryptoError::OutOfRange);
        }
        let r_inv = self.check_blinding_factor(r)?;
        Ok((blind_sig * r_inv) % &self.n)
    }

    /// `s^e mod n == H(token_id) mod n`.
    #[must_use]
    pub fn verify(&self, token_id: &str, sig: &BigUint) -> bool {
        if sig >= &self.n {
            return false;
        }
        sig.modpow(&self.e, &self.n) == self.hash_to_int(token_id)
    }

    /// Verification over the wire encoding; malformed input is simply invalid.
    #[must_use]
    pub fn verify_b64(&self, token_id: &str, sig_b64: &str) -> bool {
        self.decode(sig_b64).is_ok_and(|s| self.verify(token_id, &s))
    }

    /// Ownership proof check for a disclosed `(token_id, r)` pair against the
    /// signature recorded in the ledger.
    pub fn verify_blinding(
        &self,
        token_id: &str,
        r: &BigUint,
        sig: &BigUint,
    ) -> Result<(), CryptoError> {
        self.check_blinding_factor(r)?;
        let expected = self.derive_token_id(r)?;
        if !ct_eq_bytes(expected.as_bytes(), token_id.as_bytes()) {
            return Err(CryptoError::BindingMismatch);
        }
        if !self.verify(token_id, sig) {
            return Err(CryptoError::InvalidSignature);
        }
        // Re-derive the transcript the authority saw and check it is consistent.
        let blinded = self.blind(token_id, r)?;
        let blind_sig = (sig * r) % &self.n;
        if blind_sig.modpow(&self.e, &self.n) != blinded {
            return Err(CryptoError::InvalidSignature);
        }
        Ok(())
    }

    /// Fixed-width (modulus length) big-endian base64.
    pub fn encode(&self, x: &BigUint) -> Result<String, CryptoError> {
        if x >= &self.n {
            return Err(CryptoError::OutOfRange);
        }
        Ok(b64e(&i2osp(&x.to_bytes_be(), self.modulus_len)?))
    }

    pub fn decode(&self, s: &str) -> Result<BigUint, CryptoError> {
        let bytes = b64d(s)?;
        if bytes.is_empty() || bytes.len() > self.modulus_len {
            return Err(CryptoError::Decode(format!(
                "expected at most {} bytes, got {}",
                self.modulus_len,
                bytes.len()
            )));
        }
        let x = BigUint::from_bytes_be(&bytes);
        if x >= self.n {
            return Err(CryptoError::OutOfRange);
        }
        Ok(x)
    }

    fn check_blinding_factor(&self, r: &BigUint) -> Result<BigUint, CryptoError> {
        if *r == BigUint::from(0u32) || r >= &self.n {
            return Err(CryptoError::OutOfRange);
        }
        mod_inverse(r, &self.n).ok_or(CryptoError::NonInvertibleBlindingFactor)
    }
}

/// Decimal rendering used for blinding factors at rest and in reveal proofs.
#[must_use]
pub fn to_decimal(x: &BigUint) -> String {
    x.to_str_radix(10)
}

pub fn from_decimal(s: &str) -> Result<BigUint, CryptoError> {
    BigUint::parse_bytes(s.trim().as_bytes(), 10)
        .ok_or_else(|| CryptoError::Decode(format!("not a decimal integer: {s:?}")))
}

/// Modular inverse by the extended Euclidean algorithm.
#[must_use]
pub fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    let zero = BigInt::from(0i32);
    let one = BigInt::from(1i32);
    let modulus = BigInt::from_biguint(Sign::Plus, n.clone());

    let (mut old_r, mut r) = (BigInt::from_biguint(Sign::Plus, a % n), modulus.clone());
    let (mut old_t, mut t) = (one.clone(), zero.clone());
    while r != zero {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }
    if old_r != one {
        return None;
    }
    (((old_t % &modulus) + &modulus) % &modulus).to_biguint()
}
