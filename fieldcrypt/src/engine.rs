//! The encryption engine: what gets protected, and how.
//!
//! A [`CryptEngine`] pairs one [`CipherScheme`] with the [`FieldSelection`]
//! read from configuration. Every entry point tolerates loosely typed values:
//! falsy values (`null`, `false`, `0`, `""`, `"0"`) and non-scalars pass
//! through untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldcrypt::prelude::*;
//!
//! let config = CryptConfig::load("fieldcrypt.toml")?;
//! let engine = CryptEngine::from_config(&config)?;
//!
//! let sealed = engine.encrypt("123-45-6789");
//! assert_eq!(engine.decrypt(&sealed).as_deref(), Some("123-45-6789"));
//! ```

use crate::config::{CryptConfig, CryptMethod};
use crate::error::Error;
use crate::field_selection::FieldSelection;
use crate::scheme::CipherScheme;
use crate::store::{cipher_text, Value};
use std::collections::BTreeSet;

/// Encrypts and decrypts protected attribute values.
pub struct CryptEngine {
    scheme: CipherScheme,
    selection: FieldSelection,
}

impl CryptEngine {
    /// Creates an engine from an already built scheme and selection.
    #[must_use]
    pub const fn new(scheme: CipherScheme, selection: FieldSelection) -> Self {
        Self { scheme, selection }
    }

    /// Builds an engine from configuration.
    ///
    /// Checks, in order: the encryption method is set, the entities list is
    /// set, the method is supported, and the method's keys are present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for the first failed check.
    pub fn from_config(config: &CryptConfig) -> Result<Self, Error> {
        let method = config.method_name().ok_or(Error::MissingEncryptionMethod)?;
        let entities = config.entities.as_deref().ok_or(Error::MissingEntities)?;
        let method: CryptMethod = method.parse()?;

        let scheme = CipherScheme::from_config(method, config)?;
        let selection = FieldSelection::from_entities(entities);
        tracing::debug!(
            method = %method,
            record_types = selection.len(),
            "encryption engine ready"
        );
        Ok(Self::new(scheme, selection))
    }

    /// The active encryption method.
    #[must_use]
    pub const fn method(&self) -> CryptMethod {
        self.scheme.method()
    }

    /// Human readable name of the active method.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        self.scheme.method().display_name()
    }

    /// The configured field selection.
    #[must_use]
    pub const fn selection(&self) -> &FieldSelection {
        &self.selection
    }

    /// Protected attributes of `record_type`; empty for unconfigured types.
    #[must_use]
    pub fn protected_attributes(&self, record_type: &str) -> &BTreeSet<String> {
        self.selection.attributes_for(record_type)
    }

    /// Encrypts `plaintext`; on cipher failure the plaintext is returned.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        self.scheme.encrypt(plaintext)
    }

    /// Decrypts `ciphertext`; `None` on failure or empty result.
    #[must_use]
    pub fn decrypt(&self, ciphertext: &str) -> Option<String> {
        self.scheme.decrypt(ciphertext)
    }

    /// Whether `value` decrypts under the active scheme to something else.
    #[must_use]
    pub fn is_encrypted(&self, value: &str) -> bool {
        self.scheme.is_encrypted(value)
    }

    /// Encrypts a loosely typed value. Falsy and non-scalar values are
    /// returned as they are; numbers are encrypted by their decimal text.
    #[must_use]
    pub fn encrypt_value(&self, value: &Value) -> Value {
        cipher_text(value).map_or_else(|| value.clone(), |text| Value::String(self.encrypt(&text)))
    }

    /// Decrypts a loosely typed value. Falsy and non-scalar values are
    /// returned as they are; `None` when decryption fails.
    #[must_use]
    pub fn decrypt_value(&self, value: &Value) -> Option<Value> {
        match cipher_text(value) {
            Some(text) => self.decrypt(&text).map(Value::String),
            None => Some(value.clone()),
        }
    }

    /// Recursively decrypts every protected attribute in a nested bag of
    /// maps and sequences, matching leaves by key name at any depth.
    /// Leaves that fail to decrypt keep their value.
    #[must_use]
    pub fn decrypt_bag(&self, bag: Value) -> Value {
        match bag {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::Object(_) | Value::Array(_) => self.decrypt_bag(value),
                            leaf if self.selection.is_protected_name(&key) => {
                                self.decrypt_value(&leaf).unwrap_or(leaf)
                            }
                            leaf => leaf,
                        };
                        (key, value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(_) | Value::Array(_) => self.decrypt_bag(item),
                        leaf => leaf,
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Text for displaying a possibly encrypted value: the decrypted text,
    /// the value's own text when it does not decrypt, or an empty string for
    /// falsy and non-scalar values.
    #[must_use]
    pub fn decrypt_for_display(&self, value: &Value) -> String {
        cipher_text(value)
            .map(|text| self.decrypt(&text).unwrap_or(text))
            .unwrap_or_default()
    }
}
