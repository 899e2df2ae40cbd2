//! Account credentials: decoding, address derivation and transaction signing.
//!
//! Keys are Ed25519. Two encodings are accepted:
//!
//! - Bech32 `suiprivkey1…` (flag byte followed by the 32-byte secret)
//! - Raw 32-byte hex, with or without a `0x` prefix

use crate::types::Address;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bech32::FromBase32;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Human-readable part of bech32-encoded private keys.
pub const PRIVATE_KEY_HRP: &str = "suiprivkey";

/// Signature scheme flag for Ed25519.
const ED25519_FLAG: u8 = 0x00;

/// Intent prefix for transaction data: (scope, version, app id).
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

/// Errors decoding credential material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid bech32 private key: {0}")]
    Bech32(#[from] bech32::Error),

    #[error("Unexpected key prefix {found:?}, expected {PRIVATE_KEY_HRP:?}")]
    WrongPrefix { found: String },

    #[error("Unsupported signature scheme flag {0:#04x}, only Ed25519 is supported")]
    UnsupportedScheme(u8),

    #[error("Invalid hex private key: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Private key must be 32 bytes, got {0}")]
    WrongLength(usize),
}

/// An Ed25519 signing key for one account.
#[derive(Clone)]
pub struct AccountKey {
    signing_key: SigningKey,
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Decode a private key in either supported encoding.
    pub fn parse(encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        if encoded.starts_with(PRIVATE_KEY_HRP) {
            Self::from_bech32(encoded)
        } else {
            Self::from_hex(encoded)
        }
    }

    /// Decode a bech32 `suiprivkey1…` string.
    pub fn from_bech32(encoded: &str) -> Result<Self, KeyError> {
        let (hrp, data, _variant) = bech32::decode(encoded)?;
        if hrp != PRIVATE_KEY_HRP {
            return Err(KeyError::WrongPrefix { found: hrp });
        }
        let bytes = Vec::<u8>::from_base32(&data)?;
        let (flag, secret) = bytes.split_first().ok_or(KeyError::WrongLength(0))?;
        if *flag != ED25519_FLAG {
            return Err(KeyError::UnsupportedScheme(*flag));
        }
        Self::from_secret(secret)
    }

    /// Decode a hex-encoded 32-byte secret.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(encoded.trim_start_matches("0x"))?;
        Self::from_secret(&bytes)
    }

    /// Build a key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    fn from_secret(secret: &[u8]) -> Result<Self, KeyError> {
        let seed: [u8; 32] = secret
            .try_into()
            .map_err(|_| KeyError::WrongLength(secret.len()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Address: Blake2b-256 of `flag || public key`.
    pub fn address(&self) -> Address {
        let mut hasher = Blake2b256::new();
        hasher.update([ED25519_FLAG]);
        hasher.update(self.public_key());
        let digest: [u8; 32] = hasher.finalize().into();
        Address::from_bytes(&digest)
    }

    /// Sign transaction bytes, returning the base64 serialized signature
    /// (`flag || signature || public key`).
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> String {
        let mut hasher = Blake2b256::new();
        hasher.update(TRANSACTION_INTENT);
        hasher.update(tx_bytes);
        let digest = hasher.finalize();

        let signature = self.signing_key.sign(&digest);

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.public_key());
        BASE64.encode(serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::{ToBase32, Variant};

    fn bech32_key(flag: u8, seed: &[u8]) -> String {
        let mut data = vec![flag];
        data.extend_from_slice(seed);
        bech32::encode(PRIVATE_KEY_HRP, data.to_base32(), Variant::Bech32).unwrap()
    }

    #[test]
    fn test_bech32_and_hex_decode_to_same_key() {
        let seed = [7u8; 32];
        let from_bech32 = AccountKey::parse(&bech32_key(0, &seed)).unwrap();
        let from_hex = AccountKey::parse(&format!("0x{}", hex::encode(seed))).unwrap();

        assert_eq!(from_bech32.public_key(), from_hex.public_key());
        assert_eq!(from_bech32.address(), from_hex.address());
    }

    #[test]
    fn test_rejects_non_ed25519_scheme() {
        let err = AccountKey::parse(&bech32_key(1, &[7u8; 32])).unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedScheme(1)));
    }

    #[test]
    fn test_rejects_short_key() {
        let err = AccountKey::parse("abcd").unwrap_err();
        assert!(matches!(err, KeyError::WrongLength(2)));
    }

    #[test]
    fn test_debug_omits_secret() {
        let seed = [0x5au8; 32];
        let key = AccountKey::from_seed(&seed);
        let rendered = format!("{key:?}");

        assert!(rendered.contains(key.address().as_str()));
        assert!(!rendered.contains(&hex::encode(seed)));
        assert!(!rendered.contains("signing_key"));
    }

    #[test]
    fn test_signature_layout_and_verification() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let key = AccountKey::from_seed(&[3u8; 32]);
        let tx = b"benchmark transaction";
        let encoded = key.sign_transaction(tx);
        let bytes = BASE64.decode(encoded).unwrap();

        assert_eq!(bytes.len(), 97);
        assert_eq!(bytes[0], ED25519_FLAG);
        assert_eq!(&bytes[65..], &key.public_key());

        let mut hasher = Blake2b256::new();
        hasher.update(TRANSACTION_INTENT);
        hasher.update(tx);
        let digest = hasher.finalize();

        let sig = Signature::from_bytes(bytes[1..65].try_into().unwrap());
        let vk = VerifyingKey::from_bytes(&key.public_key()).unwrap();
        assert!(vk.verify(&digest, &sig).is_ok());
    }

    #[test]
    fn test_address_is_hex_32_bytes() {
        let key = AccountKey::from_seed(&[9u8; 32]);
        let addr = key.address();
        assert!(addr.as_str().starts_with("0x"));
        assert_eq!(addr.as_str().len(), 66);
    }
}
