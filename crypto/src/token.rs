//! Opaque token codec.
//!
//! Turns internal bytes (an offer id, a pagination cursor) into a string that
//! is safe to hand to a client, and back. Tokens are AES-256-GCM ciphertext
//! with the nonce prepended, base64url encoded without padding.
//!
//! [`TokenCodec::seal`] prefixes the plaintext with a [`TokenKind`] byte so an
//! offer token can never be replayed as a cursor, or the reverse.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::encryption::{self, EncryptedPayload};
use crate::Result;

const KEY_SALT: &[u8] = b"exchequer-token-codec";
const KEY_INFO: &[u8] = b"aes-256-gcm";
const TOKEN_AAD: &[u8] = b"exchequer-token-v1";

/// What a sealed token carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenKind {
    Offer = 0x01,
    Cursor = 0x02,
}

/// A token could not be opened.
///
/// Malformed base64, truncation, a wrong key, tampering and a kind mismatch
/// all produce this same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token could not be decrypted")]
pub struct DecryptError;

/// Symmetric codec for opaque tokens.
#[derive(Clone)]
pub struct TokenCodec {
    key: [u8; 32],
}

impl TokenCodec {
    /// Create a codec from a raw 32-byte key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create a codec whose key is derived from a configured secret.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let key = encryption::derive_key(secret.as_bytes(), KEY_SALT, KEY_INFO)?;
        Ok(Self { key })
    }

    /// Encrypt arbitrary bytes into a token.
    pub fn encode(&self, bytes: &[u8]) -> Result<String> {
        let payload = encryption::encrypt(&self.key, bytes, Some(TOKEN_AAD))?;
        Ok(URL_SAFE_NO_PAD.encode(payload.to_bytes()))
    }

    /// Recover the exact bytes passed to [`TokenCodec::encode`].
    pub fn decode(&self, token: &str) -> std::result::Result<Vec<u8>, DecryptError> {
        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| DecryptError)?;
        let payload = EncryptedPayload::from_bytes(&raw).map_err(|_| DecryptError)?;
        encryption::decrypt(&self.key, &payload, Some(TOKEN_AAD)).map_err(|_| DecryptError)
    }

    /// Encode `bytes` tagged with `kind`.
    pub fn seal(&self, kind: TokenKind, bytes: &[u8]) -> Result<String> {
        let mut tagged = Vec::with_capacity(bytes.len() + 1);
        tagged.push(kind as u8);
        tagged.extend_from_slice(bytes);
        self.encode(&tagged)
    }

    /// Decode a token sealed with the same `kind`.
    pub fn open(&self, kind: TokenKind, token: &str) -> std::result::Result<Vec<u8>, DecryptError> {
        let mut tagged = self.decode(token)?;
        if tagged.first() != Some(&(kind as u8)) {
            return Err(DecryptError);
        }
        tagged.remove(0);
        Ok(tagged)
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").field("key", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec() -> TokenCodec {
        TokenCodec::from_secret("unit-test-secret").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let token = codec.encode(b"USD").unwrap();

        assert_eq!(codec.decode(&token).unwrap(), b"USD");
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_differ_per_call() {
        let codec = codec();
        assert_ne!(codec.encode(b"same").unwrap(), codec.encode(b"same").unwrap());
    }

    #[test]
    fn test_other_installation_fails() {
        let token = codec().encode(b"offer").unwrap();
        let other = TokenCodec::from_secret("another-installation").unwrap();

        assert_eq!(other.decode(&token), Err(DecryptError));
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = codec();

        assert_eq!(codec.decode(""), Err(DecryptError));
        assert_eq!(codec.decode("not base64!"), Err(DecryptError));
        assert_eq!(codec.decode("AAAA"), Err(DecryptError));

        let token = codec.encode(b"offer").unwrap();
        assert_eq!(codec.decode(&token[..token.len() - 4]), Err(DecryptError));
    }

    #[test]
    fn test_kind_separation() {
        let codec = codec();
        let offer = codec.seal(TokenKind::Offer, b"id").unwrap();
        let cursor = codec.seal(TokenKind::Cursor, b"id").unwrap();

        assert_eq!(codec.open(TokenKind::Offer, &offer).unwrap(), b"id");
        assert_eq!(codec.open(TokenKind::Cursor, &cursor).unwrap(), b"id");
        assert_eq!(codec.open(TokenKind::Cursor, &offer), Err(DecryptError));
        assert_eq!(codec.open(TokenKind::Offer, &cursor), Err(DecryptError));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert!(format!("{:?}", codec()).contains("redacted"));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let codec = TokenCodec::new([9u8; 32]);
            let token = codec.encode(&bytes).unwrap();
            prop_assert_eq!(codec.decode(&token).unwrap(), bytes);
        }

        #[test]
        fn bit_flip_is_rejected(
            bytes in proptest::collection::vec(any::<u8>(), 0..32),
            position in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let codec = TokenCodec::new([5u8; 32]);
            let token = codec.encode(&bytes).unwrap();

            let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
            let i = position.index(raw.len());
            raw[i] ^= 1 << bit;
            let tampered = URL_SAFE_NO_PAD.encode(&raw);

            prop_assert_eq!(codec.decode(&tampered), Err(DecryptError));
        }
    }
}
