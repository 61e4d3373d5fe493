//! Authenticated encryption for long-lived session tokens.
//!
//! # Responsibility
//! - Derive a 256-bit key from an explicit secret or machine identity.
//! - Encrypt/decrypt token strings with AES-256-GCM.
//!
//! # Invariants
//! - Output encoding is base64(`nonce[12] || ciphertext || tag[16]`).
//! - Every `encrypt` call draws a fresh random nonce.
//! - Empty input maps to empty output without touching the cipher.
//! - Key material and plaintext are never logged.
//!
//! # Security
//! When `SKYCLI_SECRET` is unset the key is derived from `hostname:user`.
//! That value is guessable by any process running on the same host, so the
//! fallback only protects tokens against casual disclosure of the config
//! file. Set `SKYCLI_SECRET` for real protection. There is no key rotation:
//! changing the secret (or hostname/user under the fallback) makes every
//! stored token undecryptable and requires a fresh login.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

pub const SECRET_ENV: &str = "SKYCLI_SECRET";
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug)]
pub enum CryptoError {
    Cipher(String),
    Nonce(rand::Error),
    Encrypt,
    Decode(base64::DecodeError),
    TooShort { len: usize },
    Authentication,
    InvalidUtf8(std::string::FromUtf8Error),
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cipher(message) => write!(f, "crypto.new_cipher: {message}"),
            Self::Nonce(err) => write!(f, "crypto.generate_nonce: {err}"),
            Self::Encrypt => write!(f, "crypto.encrypt: cipher rejected input"),
            Self::Decode(err) => write!(f, "crypto.decode_base64: {err}"),
            Self::TooShort { len } => write!(
                f,
                "crypto.decrypt: ciphertext too short ({len} bytes, need at least {NONCE_SIZE})"
            ),
            Self::Authentication => write!(
                f,
                "crypto.decrypt: authentication failed (tampered data or wrong key)"
            ),
            Self::InvalidUtf8(err) => write!(f, "crypto.decrypt: plaintext is not UTF-8: {err}"),
        }
    }
}

impl Error for CryptoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Nonce(err) => Some(err),
            Self::Decode(err) => Some(err),
            Self::InvalidUtf8(err) => Some(err),
            _ => None,
        }
    }
}

impl CryptoError {
    /// Whether this error means the stored ciphertext cannot be trusted.
    ///
    /// Callers treat these as "re-authenticate" conditions.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::TooShort { .. } | Self::Authentication
        )
    }
}

/// Input to key derivation.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Explicit operator-provided secret.
    Secret(String),
    /// Machine identity fallback, hashed as `hostname:user`.
    Machine { hostname: String, user: String },
}

impl KeyMaterial {
    /// Picks the secret when present and non-empty, else the machine identity.
    pub fn from_parts(secret: Option<&str>, hostname: &str, user: &str) -> Self {
        match secret {
            Some(value) if !value.is_empty() => Self::Secret(value.to_string()),
            _ => Self::Machine {
                hostname: hostname.to_string(),
                user: user.to_string(),
            },
        }
    }

    /// Reads `SKYCLI_SECRET`, falling back to hostname and `USER`/`USERNAME`.
    pub fn from_env() -> Self {
        let secret = std::env::var(SECRET_ENV).ok();
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let user = std::env::var("USER")
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_default();
        Self::from_parts(secret.as_deref(), &hostname, &user)
    }

    pub fn is_machine_fallback(&self) -> bool {
        matches!(self, Self::Machine { .. })
    }

    fn derive_key(&self) -> [u8; KEY_SIZE] {
        let mut hasher = Sha256::new();
        match self {
            Self::Secret(secret) => hasher.update(secret.as_bytes()),
            Self::Machine { hostname, user } => {
                hasher.update(format!("{hostname}:{user}").as_bytes())
            }
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

impl Debug for KeyMaterial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("KeyMaterial::Secret(<redacted>)"),
            Self::Machine { hostname, .. } => f
                .debug_struct("KeyMaterial::Machine")
                .field("hostname", hostname)
                .finish_non_exhaustive(),
        }
    }
}

/// Stateless token cipher bound to one derived key.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; KEY_SIZE],
}

impl TokenCipher {
    pub fn new(material: &KeyMaterial) -> Self {
        Self {
            key: material.derive_key(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(&KeyMaterial::from_env())
    }

    /// Short, non-reversible identifier of the derived key.
    pub fn key_fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Encrypts `plaintext` and returns base64 text.
    ///
    /// # Errors
    /// - `Cipher` when the key is rejected by the cipher.
    /// - `Nonce` when the OS random source fails.
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(CryptoError::Nonce)?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypts text produced by [`TokenCipher::encrypt`].
    ///
    /// # Errors
    /// - `Decode` for invalid base64.
    /// - `TooShort` when the buffer cannot hold a nonce.
    /// - `Authentication` when tag verification fails.
    pub fn decrypt(&self, encoded: &str) -> CryptoResult<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let data = BASE64.decode(encoded).map_err(CryptoError::Decode)?;
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::TooShort { len: data.len() });
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plaintext).map_err(CryptoError::InvalidUtf8)
    }

    fn cipher(&self) -> CryptoResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|err| CryptoError::Cipher(err.to_string()))
    }
}

impl Debug for TokenCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key_fingerprint", &self.key_fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CryptoError, KeyMaterial, TokenCipher};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn cipher(secret: &str) -> TokenCipher {
        TokenCipher::new(&KeyMaterial::Secret(secret.to_string()))
    }

    #[test]
    fn empty_secret_falls_back_to_machine_identity() {
        let material = KeyMaterial::from_parts(Some(""), "host", "alice");
        assert_eq!(
            material,
            KeyMaterial::Machine {
                hostname: "host".to_string(),
                user: "alice".to_string(),
            }
        );
        assert!(material.is_machine_fallback());
    }

    #[test]
    fn machine_key_is_stable_and_round_trips() {
        let first = TokenCipher::new(&KeyMaterial::from_parts(None, "host", "alice"));
        let second = TokenCipher::new(&KeyMaterial::from_parts(Some(""), "host", "alice"));
        assert_eq!(first.key_fingerprint(), second.key_fingerprint());

        let encrypted = first.encrypt("token-123").unwrap();
        assert_eq!(second.decrypt(&encrypted).unwrap(), "token-123");
    }

    #[test]
    fn round_trips_assorted_strings() {
        let cipher = cipher("s3cret");
        let long = "x".repeat(4096);
        for value in ["", "a", "token-123", "ünïcødé ✓", long.as_str()] {
            let encrypted = cipher.encrypt(value).unwrap();
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), value);
        }
    }

    #[test]
    fn empty_input_short_circuits() {
        let cipher = cipher("s3cret");
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn nonce_differs_between_calls() {
        let cipher = cipher("s3cret");
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn flipping_any_byte_fails_authentication() {
        let cipher = cipher("s3cret");
        let encrypted = cipher.encrypt("token-123").unwrap();
        let raw = BASE64.decode(&encrypted).unwrap();

        for index in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            let err = cipher.decrypt(&BASE64.encode(&tampered)).unwrap_err();
            assert!(
                matches!(err, CryptoError::Authentication),
                "byte {index} flip produced {err}"
            );
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let encrypted = cipher("one").encrypt("token-123").unwrap();
        let err = cipher("two").decrypt(&encrypted).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn rejects_invalid_base64_and_short_input() {
        let cipher = cipher("s3cret");
        assert!(matches!(
            cipher.decrypt("not base64!!").unwrap_err(),
            CryptoError::Decode(_)
        ));
        let short = BASE64.encode([0u8; 5]);
        assert!(matches!(
            cipher.decrypt(&short).unwrap_err(),
            CryptoError::TooShort { len: 5 }
        ));
    }

    #[test]
    fn debug_output_hides_secret() {
        let material = KeyMaterial::Secret("hunter2".to_string());
        assert!(!format!("{material:?}").contains("hunter2"));
    }
}
