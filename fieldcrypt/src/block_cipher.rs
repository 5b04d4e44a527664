//! Symmetric block cipher scheme.
//!
//! Each message is sealed with AES-256-GCM under a subkey derived from the
//! configured secret and a random salt. Salt and nonce travel in the
//! envelope header, and the serialized header is authenticated as associated
//! data, so decryption needs nothing but the secret.

use crate::envelope::{self, EnvelopeHeader, SchemeTag};
use crate::error::Error;
use crate::kdf::{derive_subkey, random_bytes, SALT_SIZE};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use secrecy::{ExposeSecret, SecretString, SecretVec};

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM cipher keyed by an opaque configured secret.
pub struct BlockCipher {
    secret: SecretVec<u8>,
}

impl BlockCipher {
    /// Creates a block cipher from the configured secret.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingConfigKey` if the secret is empty.
    pub fn new(secret: &SecretString) -> Result<Self, Error> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.is_empty() {
            return Err(Error::MissingConfigKey("encryptionKey"));
        }
        Ok(Self { secret: SecretVec::new(bytes.to_vec()) })
    }

    /// Encrypts `plaintext` into an envelope string.
    ///
    /// # Errors
    ///
    /// Returns error if key derivation or encryption fails.
    pub fn seal(&self, plaintext: &str) -> Result<String, Error> {
        let salt: [u8; SALT_SIZE] = random_bytes();
        let nonce_bytes: [u8; NONCE_SIZE] = random_bytes();

        let header =
            EnvelopeHeader::new(SchemeTag::BlockCipher, salt.to_vec(), nonce_bytes.to_vec());
        let header_bytes = header.to_bytes()?;

        let key = derive_subkey(&self.secret, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| Error::EncryptionFailed(format!("invalid subkey: {e}")))?;

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload { msg: plaintext.as_bytes(), aad: &header_bytes },
            )
            .map_err(|e| Error::EncryptionFailed(format!("AES-GCM encryption failed: {e}")))?;

        Ok(envelope::encode(&header_bytes, &ciphertext))
    }

    /// Decrypts an envelope string produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns error if the envelope is malformed, authentication fails or
    /// the plaintext is not UTF-8.
    pub fn open(&self, value: &str) -> Result<String, Error> {
        let decoded = envelope::decode(value, SchemeTag::BlockCipher)?;
        let nonce_bytes: [u8; NONCE_SIZE] = decoded
            .header
            .nonce()
            .try_into()
            .map_err(|_| Error::DecryptionFailed("invalid nonce size".to_string()))?;

        let key = derive_subkey(&self.secret, decoded.header.material())?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| Error::DecryptionFailed(format!("invalid subkey: {e}")))?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload { msg: &decoded.payload, aad: &decoded.header_bytes },
            )
            .map_err(|_| Error::AuthenticationFailed)?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }
}
