//! Sealed-box encryption of repository secret values.
//!
//! GitHub publishes a per-repository Curve25519 public key and expects secret
//! values encrypted with libsodium's `crypto_box_seal`: an ephemeral sender key
//! is generated per message, so the ciphertext carries no sender identity and
//! only the holder of the repository's private key can open it.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use crypto_box::{PublicKey, aead::OsRng};
use thiserror::Error;

/// Length of a Curve25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Error type for sealing operations.
#[derive(Debug, Error)]
pub enum SealError {
    /// The recipient public key is not valid base64 or has the wrong length.
    #[error("malformed recipient public key: {message}")]
    MalformedKey { message: String },

    /// The encryption primitive failed.
    #[error("encryption failed: {message}")]
    Encryption { message: String },
}

/// Encrypts plaintext values for a recipient's published public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecretSealer;

impl SecretSealer {
    pub fn new() -> Self {
        Self
    }

    /// Seal `plaintext` for the base64-encoded `recipient_key`.
    ///
    /// Returns the base64-encoded ciphertext. Output differs on every call.
    pub fn seal(&self, recipient_key: &str, plaintext: &str) -> Result<String, SealError> {
        let public_key = decode_public_key(recipient_key)?;

        let ciphertext = public_key
            .seal(&mut OsRng, plaintext.as_bytes())
            .map_err(|e| SealError::Encryption {
                message: e.to_string(),
            })?;

        Ok(STANDARD.encode(ciphertext))
    }
}

fn decode_public_key(encoded: &str) -> Result<PublicKey, SealError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SealError::MalformedKey {
            message: format!("invalid base64: {}", e),
        })?;

    let bytes: [u8; PUBLIC_KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SealError::MalformedKey {
            message: format!("expected {} bytes, got {}", PUBLIC_KEY_LEN, bytes.len()),
        })?;

    Ok(PublicKey::from(bytes))
}
