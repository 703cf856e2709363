//! Decryption seam for `.pgp`-suffixed inputs.
//!
//! The actual PGP implementation lives outside this crate; the engine only
//! routes encrypted payloads through a `dyn Decryptor` before parsing.

use crate::error::IngestError;

/// Decrypts payloads fetched from the backend.
pub trait Decryptor: Send + Sync {
    /// Decrypts `payload` with the given private key and passphrase.
    fn decrypt(
        &self,
        payload: &[u8],
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>, IngestError>;
}

/// Returns true when a key names an encrypted payload.
#[must_use]
pub fn is_encrypted(key: &str) -> bool {
    key.ends_with(".pgp")
}

/// Strips the `.pgp` suffix, yielding the plaintext filename.
#[must_use]
pub fn plaintext_name(key: &str) -> &str {
    key.strip_suffix(".pgp").unwrap_or(key)
}

/// Decryptor for unencrypted feeds; rejects any `.pgp` input outright
/// rather than passing ciphertext through to the parsers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecryptor;

impl Decryptor for NoDecryptor {
    fn decrypt(
        &self,
        _payload: &[u8],
        _private_key: &str,
        _passphrase: Option<&str>,
    ) -> Result<Vec<u8>, IngestError> {
        Err(IngestError::configuration(
            "encrypted payload received but no decryptor is configured",
        ))
    }
}
