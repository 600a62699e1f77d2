//! Split-token encoding for bearer credentials.
//!
//! A presented token string is one random blob split at a fixed offset into
//! a non-secret selector (indexed, unique per token row) and a secret
//! validator. Only a hash of the validator is stored, and it is compared in
//! constant time, so the database never holds material that an equality
//! probe could leak byte-by-byte.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fixed split offset; every stored selector is exactly this long.
pub const SELECTOR_LEN: usize = 42;

/// Raw entropy per token. 64 bytes encode to 86 base64url chars, leaving a
/// 44-char validator after the selector prefix.
pub const TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The full string handed to the client, never stored.
    pub token: String,
    pub selector: String,
    pub validator_hash: String,
}

#[derive(Debug, Clone)]
pub struct TokenParts {
    pub selector: String,
    pub validator_hash: String,
}

pub fn encode() -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = Base64UrlUnpadded::encode_string(&bytes);

    let (selector, validator) = token.split_at(SELECTOR_LEN);
    IssuedToken {
        selector: selector.to_string(),
        validator_hash: hash_validator(validator),
        token,
    }
}

/// Re-derive the storage parts from a presented token string.
///
/// Malformed or too-short input degrades to parts that cannot match any
/// stored record (stored selectors are always SELECTOR_LEN chars) rather
/// than an error.
pub fn decode(presented: &str) -> TokenParts {
    if presented.len() <= SELECTOR_LEN || !presented.is_char_boundary(SELECTOR_LEN) {
        return TokenParts {
            selector: presented.to_string(),
            validator_hash: hash_validator(""),
        };
    }

    let (selector, validator) = presented.split_at(SELECTOR_LEN);
    TokenParts {
        selector: selector.to_string(),
        validator_hash: hash_validator(validator),
    }
}

fn hash_validator(validator: &str) -> String {
    let digest = Sha256::digest(validator.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Constant-time comparison of a computed validator hash against a stored
/// one. Never compare these with `==`.
pub fn validator_hash_matches(computed: &str, stored: &str) -> bool {
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}
