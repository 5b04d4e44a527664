//! Error types for `fieldcrypt` operations.

use std::fmt;
use std::path::PathBuf;

/// Main error type for `fieldcrypt` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `[fieldcrypt]` table is absent from the configuration file
    #[error("fieldcrypt section is not set in config")]
    MissingSection,

    /// No encryption method configured
    #[error("encryptionMethod is not set in config")]
    MissingEncryptionMethod,

    /// No entities list configured
    #[error("fieldcrypt entities config not set")]
    MissingEntities,

    /// The configured encryption method is not one of the supported schemes
    #[error("{method} is not a supported encryption method, expected one of {expected}")]
    UnsupportedMethod {
        /// The method found in the configuration
        method: String,
        /// Supported method identifiers
        expected: String,
    },

    /// A scheme-specific configuration key is missing or empty
    #[error("{0} key not set in config")]
    MissingConfigKey(&'static str),

    /// A key file named in the configuration could not be read
    #[error("cannot read key file {}: {source}", path.display())]
    KeyFile {
        /// Path of the key file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The configuration document could not be parsed
    #[error("invalid config: {0}")]
    ConfigParse(String),

    /// The field selection is empty, so a batch run has nothing to do
    #[error("no entities found in config")]
    NoEntities,

    /// A re-encryption method argument is not a supported scheme
    #[error("{role} method {method} is not valid, expecting one of {expected}")]
    InvalidMethodArgument {
        /// Either "decryption" or "encryption"
        role: &'static str,
        /// The rejected argument
        method: String,
        /// Supported method identifiers
        expected: String,
    },

    /// Only one of the two re-encryption method arguments was given
    #[error("you must specify both decrypt and encrypt methods to manually re-encrypt records")]
    PartialMethodArguments,

    /// Source and target re-encryption methods are identical
    #[error("encryption and decryption methods cannot be the same")]
    SameMethods,

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Authentication tag verification failed (data may be corrupted or tampered)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Ciphertext envelope parsing failed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Unsupported envelope version
    #[error("unsupported version: {version} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found in the ciphertext
        version: u8,
        /// Supported versions
        supported: String,
    },

    /// Key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Key material could not be decoded
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Record store operation failed
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// The confirmation prompt could not be read
    #[error("confirmation failed: {0}")]
    Confirmation(std::io::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors detected before any record is touched
    /// because the configuration or the command arguments are unusable.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingSection
                | Self::MissingEncryptionMethod
                | Self::MissingEntities
                | Self::NoEntities
                | Self::UnsupportedMethod { .. }
                | Self::MissingConfigKey(_)
                | Self::KeyFile { .. }
                | Self::ConfigParse(_)
                | Self::InvalidMethodArgument { .. }
                | Self::PartialMethodArguments
                | Self::SameMethods
        )
    }
}

/// Errors raised by a [`RecordStore`](crate::store::RecordStore) backend.
#[derive(Debug)]
pub enum StoreError {
    /// Stored data could not be decoded
    Malformed(String),

    /// Backend-specific failure
    Backend(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed record: {msg}"),
            Self::Backend(msg) => write!(f, "backend failure: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::MissingEncryptionMethod.is_configuration());
        assert!(Error::MissingConfigKey("encryptionKey").is_configuration());
        assert!(Error::SameMethods.is_configuration());
        assert!(Error::NoEntities.is_configuration());
        assert!(!Error::AuthenticationFailed.is_configuration());
    }

    #[test]
    fn test_messages_name_the_missing_key() {
        let err = Error::MissingConfigKey("rsaKeyPassphrase");
        assert_eq!(err.to_string(), "rsaKeyPassphrase key not set in config");

        let err = Error::UnsupportedMethod {
            method: "des".to_string(),
            expected: "block-cipher, rsa".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "des is not a supported encryption method, expected one of block-cipher, rsa"
        );
    }

    #[test]
    fn test_store_error_source() {
        let err = StoreError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&StoreError::Backend("x".into())).is_none());
    }
}
