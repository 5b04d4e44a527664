//! Migration of stored values from one cipher scheme to the other.

use crate::batch::{BatchOptions, BatchProcessor, Confirmation, RunOutcome, Transform};
use crate::config::{CryptConfig, CryptMethod};
use crate::engine::CryptEngine;
use crate::error::Error;
use crate::store::RecordStore;

/// A pair of engines: one to decrypt what is stored, one to encrypt it again.
pub struct ReEncryption {
    source: CryptEngine,
    target: CryptEngine,
}

impl ReEncryption {
    /// Resolves the source and target methods of a re-encryption.
    ///
    /// With both arguments given, each must name a supported method (the
    /// source is checked first) and they must differ. With neither, the
    /// configured method is the target and the other scheme the source.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMethodArgument` for an unsupported argument,
    /// `Error::SameMethods` for identical arguments,
    /// `Error::PartialMethodArguments` when only one is given, and
    /// `Error::MissingEncryptionMethod` or `Error::InvalidMethodArgument`
    /// when the configured method is unusable.
    pub fn resolve_methods(
        source: Option<&str>,
        target: Option<&str>,
        config: &CryptConfig,
    ) -> Result<(CryptMethod, CryptMethod), Error> {
        fn present(arg: Option<&str>) -> Option<&str> {
            arg.filter(|a| !a.is_empty())
        }

        match (present(source), present(target)) {
            (Some(source), Some(target)) => {
                let source = parse_argument("decryption", source)?;
                let target = parse_argument("encryption", target)?;
                if source == target {
                    return Err(Error::SameMethods);
                }
                Ok((source, target))
            }
            (Some(_), None) | (None, Some(_)) => Err(Error::PartialMethodArguments),
            (None, None) => {
                let target = config.method_name().ok_or(Error::MissingEncryptionMethod)?;
                let target = parse_argument("encryption", target)?;
                Ok((target.other(), target))
            }
        }
    }

    /// Resolves the methods and builds both engines.
    ///
    /// # Errors
    ///
    /// Returns the resolution error, or the configuration error of whichever
    /// engine cannot be built. No record is touched in either case.
    pub fn from_config(
        config: &CryptConfig,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<Self, Error> {
        let (source, target) = Self::resolve_methods(source, target, config)?;
        let source = CryptEngine::from_config(&config.with_method(source))?;
        let target = CryptEngine::from_config(&config.with_method(target))?;
        tracing::debug!(
            source = %source.method(),
            target = %target.method(),
            "re-encryption engines ready"
        );
        Ok(Self { source, target })
    }

    /// Creates a re-encryption from two ready engines.
    #[must_use]
    pub const fn new(source: CryptEngine, target: CryptEngine) -> Self {
        Self { source, target }
    }

    /// Engine decrypting the stored values.
    #[must_use]
    pub const fn source(&self) -> &CryptEngine {
        &self.source
    }

    /// Engine encrypting the new values.
    #[must_use]
    pub const fn target(&self) -> &CryptEngine {
        &self.target
    }

    /// The batch transform of this re-encryption.
    #[must_use]
    pub const fn transform(&self) -> Transform<'_> {
        Transform::ReEncrypt { source: &self.source, target: &self.target }
    }

    /// Re-encrypts every configured attribute in `store`.
    ///
    /// # Errors
    ///
    /// See [`BatchProcessor::run`].
    pub fn run<S: RecordStore>(
        &self,
        store: &mut S,
        options: BatchOptions,
        confirmation: &mut dyn Confirmation,
    ) -> Result<RunOutcome, Error> {
        tracing::info!(
            source = self.source.display_name(),
            target = self.target.display_name(),
            "re-encrypting stored records"
        );
        BatchProcessor::new(store, options).run(&self.transform(), confirmation)
    }
}

fn parse_argument(role: &'static str, method: &str) -> Result<CryptMethod, Error> {
    method.parse().map_err(|_| Error::InvalidMethodArgument {
        role,
        method: method.to_string(),
        expected: CryptMethod::expected(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::AssumeYes;
    use crate::error::StoreError;
    use crate::store::{AttributeMap, Value};
    use secrecy::SecretString;
    use serde_json::json;

    fn config(method: &str) -> CryptConfig {
        CryptConfig::from_toml_str(&format!(
            r#"
            [fieldcrypt]
            encryptionMethod = "{method}"
            encryptionKey = "block key"
            [[fieldcrypt.entities]]
            class = "Customer"
            properties = ["ssn"]
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_resolve_from_config() {
        let resolved = ReEncryption::resolve_methods(None, None, &config("block-cipher")).unwrap();
        assert_eq!(resolved, (CryptMethod::Rsa, CryptMethod::BlockCipher));

        let resolved = ReEncryption::resolve_methods(None, None, &config("rsa")).unwrap();
        assert_eq!(resolved, (CryptMethod::BlockCipher, CryptMethod::Rsa));
    }

    #[test]
    fn test_resolve_explicit_arguments() {
        let config = config("block-cipher");
        let resolved =
            ReEncryption::resolve_methods(Some("block-cipher"), Some("rsa"), &config).unwrap();
        assert_eq!(resolved, (CryptMethod::BlockCipher, CryptMethod::Rsa));

        let result = ReEncryption::resolve_methods(Some("des"), Some("aes"), &config);
        assert!(matches!(
            result,
            Err(Error::InvalidMethodArgument { role: "decryption", .. })
        ));

        let result = ReEncryption::resolve_methods(Some("rsa"), Some("aes"), &config);
        assert!(matches!(
            result,
            Err(Error::InvalidMethodArgument { role: "encryption", .. })
        ));

        let result = ReEncryption::resolve_methods(Some("rsa"), Some("rsa"), &config);
        assert!(matches!(result, Err(Error::SameMethods)));
    }

    #[test]
    fn test_resolve_partial_arguments() {
        let config = config("block-cipher");
        assert!(matches!(
            ReEncryption::resolve_methods(Some("rsa"), None, &config),
            Err(Error::PartialMethodArguments)
        ));
        assert!(matches!(
            ReEncryption::resolve_methods(None, Some("rsa"), &config),
            Err(Error::PartialMethodArguments)
        ));
    }

    #[test]
    fn test_resolve_unusable_config() {
        let missing = CryptConfig::from_toml_str("[fieldcrypt]\n").unwrap();
        assert!(matches!(
            ReEncryption::resolve_methods(None, None, &missing),
            Err(Error::MissingEncryptionMethod)
        ));
        assert!(matches!(
            ReEncryption::resolve_methods(None, None, &config("des")),
            Err(Error::InvalidMethodArgument { role: "encryption", .. })
        ));
    }

    #[test]
    fn test_from_config_fails_when_source_keys_missing() {
        // the key pair source has no key files configured
        let result = ReEncryption::from_config(&config("block-cipher"), None, None);
        assert!(matches!(result, Err(Error::MissingConfigKey("rsaPublicKeyFile"))));
    }

    struct OneRecord {
        record: AttributeMap,
        pending: Option<AttributeMap>,
    }

    impl RecordStore for OneRecord {
        type Record = ();
        type Stream = std::iter::Once<Result<(), StoreError>>;

        fn stream_all(&mut self, record_type: &str) -> Result<Option<Self::Stream>, StoreError> {
            Ok((record_type == "Customer").then(|| std::iter::once(Ok(()))))
        }

        fn extract_attributes(&self, _record: &()) -> AttributeMap {
            self.record.clone()
        }

        fn apply_attributes(
            &mut self,
            _record: &(),
            changes: AttributeMap,
        ) -> Result<(), StoreError> {
            self.pending = Some(changes);
            Ok(())
        }

        fn release_buffered_state(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn commit_buffered_writes(&mut self) -> Result<(), StoreError> {
            if let Some(changes) = self.pending.take() {
                self.record.extend(changes);
            }
            Ok(())
        }
    }

    #[test]
    fn test_run_between_block_cipher_keys() {
        let old = CryptEngine::from_config(&config("block-cipher")).unwrap();
        let mut rotated = config("block-cipher");
        rotated.encryption_key = Some(SecretString::new("rotated key".to_string()));
        let new = CryptEngine::from_config(&rotated).unwrap();

        let mut record = AttributeMap::new();
        record.insert("ssn".to_string(), Value::String(old.encrypt("123-45-6789")));
        let mut store = OneRecord { record, pending: None };

        let reencryption = ReEncryption::new(old, new);
        let outcome =
            reencryption.run(&mut store, BatchOptions::default(), &mut AssumeYes).unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(ref report) if report.processed() == 1));
        let stored = &store.record["ssn"];
        assert_eq!(reencryption.source().decrypt_value(stored), None);
        assert_eq!(reencryption.target().decrypt_value(stored), Some(json!("123-45-6789")));
    }
}
