//! Cipher scheme selection and the value-level failure policy.
//!
//! Whatever the scheme, encryption fails open (the plaintext comes back
//! unchanged) and decryption fails closed (`None`). Callers never see a
//! cipher error.

use crate::block_cipher::BlockCipher;
use crate::config::{CryptConfig, CryptMethod};
use crate::error::Error;
use crate::key_pair::KeyPairCipher;

/// The active cipher of an engine.
pub enum CipherScheme {
    /// Symmetric block cipher.
    BlockCipher(BlockCipher),
    /// Public/private key pair.
    KeyPair(KeyPairCipher),
}

impl CipherScheme {
    /// Builds the scheme for `method` from the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingConfigKey` when a key required by the method is
    /// missing or empty, and `Error::KeyFile` when a key file is unreadable.
    pub fn from_config(method: CryptMethod, config: &CryptConfig) -> Result<Self, Error> {
        match method {
            CryptMethod::BlockCipher => {
                let key =
                    CryptConfig::require_secret(config.encryption_key.as_ref(), "encryptionKey")?;
                Ok(Self::BlockCipher(BlockCipher::new(&key)?))
            }
            CryptMethod::Rsa => {
                let public = CryptConfig::require_path(
                    config.rsa_public_key_file.as_ref(),
                    "rsaPublicKeyFile",
                )?;
                let private = CryptConfig::require_path(
                    config.rsa_private_key_file.as_ref(),
                    "rsaPrivateKeyFile",
                )?;
                let passphrase = CryptConfig::require_secret(
                    config.rsa_key_passphrase.as_ref(),
                    "rsaKeyPassphrase",
                )?;
                Ok(Self::KeyPair(KeyPairCipher::from_files(&public, &private, passphrase)?))
            }
        }
    }

    /// The method this scheme implements.
    #[must_use]
    pub const fn method(&self) -> CryptMethod {
        match self {
            Self::BlockCipher(_) => CryptMethod::BlockCipher,
            Self::KeyPair(_) => CryptMethod::Rsa,
        }
    }

    /// Encrypts `plaintext`, returning it unchanged if the cipher fails.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        let result = match self {
            Self::BlockCipher(cipher) => cipher.seal(plaintext),
            Self::KeyPair(cipher) => cipher.seal(plaintext),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(
                method = %self.method(),
                error = %e,
                "encryption failed, value left as plaintext"
            );
            plaintext.to_string()
        })
    }

    /// Decrypts `ciphertext`; `None` if it cannot be decrypted or is empty.
    #[must_use]
    pub fn decrypt(&self, ciphertext: &str) -> Option<String> {
        let result = match self {
            Self::BlockCipher(cipher) => cipher.open(ciphertext),
            Self::KeyPair(cipher) => cipher.open(ciphertext),
        };
        result.ok().filter(|plaintext| !plaintext.is_empty())
    }

    /// Whether `value` looks like a ciphertext of this scheme.
    ///
    /// This decrypts and compares: a value is considered encrypted when it
    /// decrypts to something different from itself. It is a heuristic, not
    /// a marker check.
    #[must_use]
    pub fn is_encrypted(&self, value: &str) -> bool {
        self.decrypt(value).is_some_and(|plaintext| plaintext != value)
    }
}
