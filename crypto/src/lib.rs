//! Exchequer Cryptographic Primitives
//!
//! AES-256-GCM encryption, HKDF key derivation, and the opaque token codec
//! used for offer handles and pagination cursors.

pub mod encryption;
pub mod token;

pub use encryption::{decrypt, derive_key, encrypt, EncryptedPayload};
pub use token::{DecryptError, TokenCodec, TokenKind};

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
