//! AES-GCM encryption support.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::{CryptoError, Result};

/// Nonce length for AES-GCM.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length appended by AES-GCM.
pub const TAG_LEN: usize = 16;

/// Nonce and ciphertext of one encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Random per-call nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Wire form: nonce followed by ciphertext.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split a wire form back into nonce and ciphertext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed("Payload too short".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed("Invalid nonce length".to_string()))?;

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Arguments
/// * `key` - 32-byte encryption key
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data (not encrypted, but authenticated)
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: Option<&[u8]>) -> Result<EncryptedPayload> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or_default(),
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt ciphertext using AES-256-GCM.
///
/// Every failure reports the same error so callers cannot tell a wrong key
/// from a tampered payload.
pub fn decrypt(key: &[u8; 32], payload: &EncryptedPayload, aad: Option<&[u8]>) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::DecryptionFailed("Decryption failed".to_string()))?;

    let nonce = Nonce::from_slice(&payload.nonce);
    let payload = Payload {
        msg: payload.ciphertext.as_slice(),
        aad: aad.unwrap_or_default(),
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|_| CryptoError::DecryptionFailed("Decryption failed".to_string()))
}

/// Derive an encryption key using HKDF.
pub fn derive_key(secret: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    use hkdf::Hkdf;
    use sha2::Sha256;

    if secret.is_empty() {
        return Err(CryptoError::InvalidKey("Empty secret".to_string()));
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut key = [0u8; 32];
    hk.expand(info, &mut key)
        .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;

    Ok(key)
}
