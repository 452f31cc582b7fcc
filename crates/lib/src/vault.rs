//! # Credential Vault
//!
//! Symmetric authenticated encryption for user API credentials. Secrets live
//! only in encrypted form at rest; decryption happens exclusively inside the
//! session supervisor at client construction time.
//!
//! Every encryption generates a fresh random 96-bit nonce via the system
//! CSPRNG; the ciphertext is stored as `base64(nonce ‖ ciphertext ‖ tag)`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Encryption key must be exactly {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("Failed to initialise AES-256-GCM key")]
    KeyInit,
    #[error("Failed to generate random nonce")]
    NonceGeneration,
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed: wrong key or corrupted ciphertext")]
    Decrypt,
    #[error("Ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("Decrypted credential is not valid UTF-8")]
    NotUtf8,
}

/// Process-wide credential vault. Construct once at startup from the
/// configured key; a missing or malformed key is fatal.
#[derive(Clone)]
pub struct Vault {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    /// Creates a vault from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| VaultError::BadKeyLength(key.len()))?;
        Ok(Self { key })
    }

    /// Creates a vault from a base64-encoded key, the form used in
    /// configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Self::new(&bytes)
    }

    /// Encrypts a credential. Returns `base64(nonce ‖ ciphertext ‖ tag)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::KeyInit)?;
        let sealing_key = LessSafeKey::new(unbound);

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| VaultError::NonceGeneration)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + in_out.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&in_out);
        Ok(BASE64.encode(combined))
    }

    /// Decrypts a credential previously produced by [`Vault::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let combined = BASE64.decode(ciphertext.trim())?;
        if combined.len() <= NONCE_LEN {
            return Err(VaultError::Decrypt);
        }
        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| VaultError::Decrypt)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::KeyInit)?;
        let opening_key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = sealed.to_vec();
        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Decrypt)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::NotUtf8)
    }

    /// Generates a fresh random key, base64-encoded, for operator setup.
    pub fn generate_key() -> Result<String, VaultError> {
        let rng = SystemRandom::new();
        let mut key = [0u8; KEY_LEN];
        rng.fill(&mut key).map_err(|_| VaultError::NonceGeneration)?;
        Ok(BASE64.encode(key))
    }
}

/// Masks a sensitive value for logs and user display: first and last two
/// characters survive, the middle is elided. Values of four characters or
/// fewer are fully masked.
pub fn mask(sensitive: &str) -> String {
    let chars: Vec<char> = sensitive.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}…{tail}")
}
