//! Configuration for the encryption engine.
//!
//! Configuration lives in a `[fieldcrypt]` table of a TOML document:
//!
//! ```toml
//! [fieldcrypt]
//! encryptionMethod = "block-cipher"
//! encryptionKey = "correct horse battery staple"
//!
//! [[fieldcrypt.entities]]
//! class = "Customer"
//! properties = ["email", "ssn"]
//! ```
//!
//! Values are kept loosely typed until the engine is built, so that each
//! missing key surfaces as its own [`Error`] rather than as a parse failure.

use crate::error::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable overriding `encryptionMethod`.
pub const ENV_ENCRYPTION_METHOD: &str = "FIELDCRYPT_ENCRYPTION_METHOD";
/// Environment variable overriding `encryptionKey`.
pub const ENV_ENCRYPTION_KEY: &str = "FIELDCRYPT_ENCRYPTION_KEY";
/// Environment variable overriding `rsaKeyPassphrase`.
pub const ENV_RSA_KEY_PASSPHRASE: &str = "FIELDCRYPT_RSA_KEY_PASSPHRASE";

/// Default number of records between store buffer releases.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Supported cipher schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptMethod {
    /// Symmetric authenticated block cipher (AES-256-GCM).
    BlockCipher,
    /// Public/private key pair; only the public key is needed to encrypt.
    Rsa,
}

impl CryptMethod {
    /// All supported methods, in the order they are listed to users.
    pub const ALL: [Self; 2] = [Self::BlockCipher, Self::Rsa];

    /// Configuration identifier of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockCipher => "block-cipher",
            Self::Rsa => "rsa",
        }
    }

    /// Human readable name of the method.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::BlockCipher => "Block Cipher",
            Self::Rsa => "RSA Key Encryption",
        }
    }

    /// The other supported method.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::BlockCipher => Self::Rsa,
            Self::Rsa => Self::BlockCipher,
        }
    }

    /// Comma separated list of the supported identifiers.
    #[must_use]
    pub fn expected() -> String {
        Self::ALL.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for CryptMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|m| m.as_str() == s).ok_or_else(|| Error::UnsupportedMethod {
            method: s.to_string(),
            expected: Self::expected(),
        })
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    fieldcrypt: Option<CryptConfig>,
}

/// The `[fieldcrypt]` configuration block.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptConfig {
    /// One of the [`CryptMethod`] identifiers.
    pub encryption_method: Option<String>,
    /// Secret for the block cipher scheme.
    pub encryption_key: Option<SecretString>,
    /// Public key file for the key pair scheme.
    pub rsa_public_key_file: Option<PathBuf>,
    /// Passphrase-protected private key file for the key pair scheme.
    pub rsa_private_key_file: Option<PathBuf>,
    /// Passphrase unlocking the private key.
    pub rsa_key_passphrase: Option<SecretString>,
    /// Records of the form `{ class = "...", properties = [...] }`.
    pub entities: Option<Vec<serde_json::Value>>,
    /// Records processed between store buffer releases during batch runs.
    pub batch_size: Option<usize>,
}

impl CryptConfig {
    /// Parses a TOML document containing a `[fieldcrypt]` table.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigParse` for malformed TOML and
    /// `Error::MissingSection` when the table is absent.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        file.fieldcrypt.ok_or(Error::MissingSection)
    }

    /// Loads configuration from a file and applies environment overrides.
    ///
    /// Relative key file paths are resolved against the directory holding
    /// the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_key_paths(base);
        }
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Overrides the method and secrets from `lookup`, which maps the
    /// `FIELDCRYPT_*` variable names to values. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(method) = lookup(ENV_ENCRYPTION_METHOD) {
            self.encryption_method = Some(method);
        }
        if let Some(key) = lookup(ENV_ENCRYPTION_KEY) {
            self.encryption_key = Some(SecretString::new(key));
        }
        if let Some(passphrase) = lookup(ENV_RSA_KEY_PASSPHRASE) {
            self.rsa_key_passphrase = Some(SecretString::new(passphrase));
        }
    }

    fn resolve_key_paths(&mut self, base: &Path) {
        for path in [&mut self.rsa_public_key_file, &mut self.rsa_private_key_file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() && !path.as_os_str().is_empty() {
                *path = base.join(&*path);
            }
        }
    }

    /// Returns a copy of this configuration using `method`.
    #[must_use]
    pub fn with_method(&self, method: CryptMethod) -> Self {
        let mut config = self.clone();
        config.encryption_method = Some(method.as_str().to_string());
        config
    }

    /// The configured method identifier, treating an empty string as unset.
    #[must_use]
    pub fn method_name(&self) -> Option<&str> {
        self.encryption_method.as_deref().filter(|m| !m.is_empty())
    }

    /// Records between buffer releases, defaulting to [`DEFAULT_BATCH_SIZE`].
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size.filter(|size| *size > 0).unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub(crate) fn require_secret(
        value: Option<&SecretString>,
        key: &'static str,
    ) -> Result<SecretString, Error> {
        value
            .filter(|s| !s.expose_secret().is_empty())
            .map(|s| SecretString::new(s.expose_secret().clone()))
            .ok_or(Error::MissingConfigKey(key))
    }

    pub(crate) fn require_path(
        value: Option<&PathBuf>,
        key: &'static str,
    ) -> Result<PathBuf, Error> {
        value.filter(|p| !p.as_os_str().is_empty()).cloned().ok_or(Error::MissingConfigKey(key))
    }
}

impl Clone for CryptConfig {
    fn clone(&self) -> Self {
        let copy = |s: &SecretString| SecretString::new(s.expose_secret().clone());
        Self {
            encryption_method: self.encryption_method.clone(),
            encryption_key: self.encryption_key.as_ref().map(copy),
            rsa_public_key_file: self.rsa_public_key_file.clone(),
            rsa_private_key_file: self.rsa_private_key_file.clone(),
            rsa_key_passphrase: self.rsa_key_passphrase.as_ref().map(copy),
            entities: self.entities.clone(),
            batch_size: self.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [fieldcrypt]
        encryptionMethod = "block-cipher"
        encryptionKey = "secret"
        rsaPublicKeyFile = "keys/public.key"
        rsaPrivateKeyFile = "/etc/keys/private.key"
        batchSize = 50

        [[fieldcrypt.entities]]
        class = "Customer"
        properties = ["email", "ssn"]
    "#;

    #[test]
    fn test_parse_sample() {
        let config = CryptConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.method_name(), Some("block-cipher"));
        assert_eq!(config.encryption_key.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(config.entities.as_ref().unwrap().len(), 1);
        assert_eq!(config.batch_size(), 50);
    }

    #[test]
    fn test_missing_section() {
        let result = CryptConfig::from_toml_str("[other]\nkey = 1\n");
        assert!(matches!(result, Err(Error::MissingSection)));
    }

    #[test]
    fn test_malformed_toml() {
        let result = CryptConfig::from_toml_str("[fieldcrypt\n");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_method_round_trip() {
        for method in CryptMethod::ALL {
            assert_eq!(method.as_str().parse::<CryptMethod>().unwrap(), method);
            assert_ne!(method.other(), method);
        }
        assert!(matches!("des".parse::<CryptMethod>(), Err(Error::UnsupportedMethod { .. })));
        assert_eq!(CryptMethod::expected(), "block-cipher, rsa");
    }

    #[test]
    fn test_overrides_replace_secrets() {
        let mut config = CryptConfig::from_toml_str(SAMPLE).unwrap();
        config.apply_overrides(|name| match name {
            ENV_ENCRYPTION_METHOD => Some("rsa".to_string()),
            ENV_ENCRYPTION_KEY => Some(String::new()),
            ENV_RSA_KEY_PASSPHRASE => Some("pass".to_string()),
            _ => None,
        });
        assert_eq!(config.method_name(), Some("rsa"));
        // empty override leaves the file value in place
        assert_eq!(config.encryption_key.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(config.rsa_key_passphrase.as_ref().unwrap().expose_secret(), "pass");
    }

    #[test]
    fn test_relative_key_paths_resolve_against_config_dir() {
        let mut config = CryptConfig::from_toml_str(SAMPLE).unwrap();
        config.resolve_key_paths(Path::new("/srv/app"));
        assert_eq!(
            config.rsa_public_key_file.as_deref(),
            Some(Path::new("/srv/app/keys/public.key"))
        );
        assert_eq!(
            config.rsa_private_key_file.as_deref(),
            Some(Path::new("/etc/keys/private.key"))
        );
    }

    #[test]
    fn test_with_method_keeps_everything_else() {
        let config = CryptConfig::from_toml_str(SAMPLE).unwrap();
        let switched = config.with_method(CryptMethod::Rsa);
        assert_eq!(switched.method_name(), Some("rsa"));
        assert_eq!(switched.entities, config.entities);
        assert_eq!(switched.encryption_key.as_ref().unwrap().expose_secret(), "secret");
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let config = CryptConfig::from_toml_str(
            "[fieldcrypt]\nencryptionMethod = \"\"\nencryptionKey = \"\"\nbatchSize = 0\n",
        )
        .unwrap();
        assert_eq!(config.method_name(), None);
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        let result =
            CryptConfig::require_secret(config.encryption_key.as_ref(), "encryptionKey");
        assert!(matches!(result, Err(Error::MissingConfigKey("encryptionKey"))));
    }
}
