//! Credential decryption for engine store passwords.
//!
//! Encrypted values are `base64(nonce || ciphertext)` sealed with
//! ChaCha20-Poly1305 under a 32-byte key, itself configured as base64.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    chacha20poly1305::{
        ChaCha20Poly1305, Nonce,
        aead::{Aead, AeadCore, KeyInit, OsRng},
    },
    secrecy::{ExposeSecret, SecretString},
};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no credential key configured")]
    MissingKey,
    #[error("credential key must be 32 bytes encoded as base64")]
    InvalidKey,
    #[error("encrypted value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("encrypted value is too short")]
    Truncated,
    #[error("decryption failed (wrong key or corrupted value)")]
    Decrypt,
    #[error("decrypted value is not valid utf-8")]
    Utf8,
    #[error("encryption failed")]
    Encrypt,
}

/// Turns an encrypted store credential into its plaintext.
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<SecretString, CryptoError>;
}

/// ChaCha20-Poly1305 credential codec.
pub struct ChaChaCredentials {
    cipher: ChaCha20Poly1305,
}

impl ChaChaCredentials {
    pub fn from_base64_key(key: &SecretString) -> Result<Self, CryptoError> {
        let raw = BASE64
            .decode(key.expose_secret().trim())
            .map_err(|_| CryptoError::InvalidKey)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&raw).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Generate a fresh random key, base64 encoded.
    pub fn generate_key() -> String {
        BASE64.encode(ChaCha20Poly1305::generate_key(&mut OsRng))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(BASE64.encode(out))
    }
}

impl CredentialDecryptor for ChaChaCredentials {
    fn decrypt(&self, encrypted: &str) -> Result<SecretString, CryptoError> {
        let raw = BASE64.decode(encrypted.trim())?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        let plain = String::from_utf8(plain).map_err(|_| CryptoError::Utf8)?;
        Ok(SecretString::new(plain))
    }
}

/// Decryptor used when no key is configured: every decryption fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredCredentials;

impl CredentialDecryptor for UnconfiguredCredentials {
    fn decrypt(&self, _encrypted: &str) -> Result<SecretString, CryptoError> {
        Err(CryptoError::MissingKey)
    }
}
