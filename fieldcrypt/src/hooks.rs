//! Transparent encryption on record lifecycle events.
//!
//! [`CryptHooks`] is called by a persistence layer before a record is
//! created or updated, and after one is loaded. Stored values are encrypted
//! while in-memory values are plaintext.
//!
//! ```rust,ignore
//! use fieldcrypt::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Encryptable)]
//! struct Customer {
//!     name: String,
//!     ssn: Option<String>,
//! }
//!
//! let hooks = CryptHooks::new(Arc::new(engine), EncryptableAccess);
//! hooks.on_create(&mut customer);
//! ```

use crate::engine::CryptEngine;
use crate::store::{AttributeMap, Value};
use std::borrow::Cow;
use std::sync::Arc;

/// A record type whose attributes can be read and written by name.
///
/// Usually implemented with `#[derive(Encryptable)]`.
pub trait Encryptable {
    /// Record type name matched against the `class` of the configuration.
    const RECORD_TYPE: &'static str;

    /// The record's exposed attributes.
    fn extract_attributes(&self) -> AttributeMap;

    /// Writes back the given attributes; unknown names are ignored.
    fn apply_attributes(&mut self, attributes: AttributeMap);
}

/// Reads and writes the attributes of records of type `R`.
pub trait AttributeAccess<R: ?Sized> {
    /// Record type name of `record`.
    fn record_type<'r>(&self, record: &'r R) -> Cow<'r, str>;

    /// Attributes of `record`.
    fn extract(&self, record: &R) -> AttributeMap;

    /// Writes `attributes` into `record`.
    fn hydrate(&self, record: &mut R, attributes: AttributeMap);
}

/// [`AttributeAccess`] for any [`Encryptable`] record.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptableAccess;

impl<R: Encryptable> AttributeAccess<R> for EncryptableAccess {
    fn record_type<'r>(&self, _record: &'r R) -> Cow<'r, str> {
        Cow::Borrowed(R::RECORD_TYPE)
    }

    fn extract(&self, record: &R) -> AttributeMap {
        record.extract_attributes()
    }

    fn hydrate(&self, record: &mut R, attributes: AttributeMap) {
        record.apply_attributes(attributes);
    }
}

/// Lifecycle callbacks encrypting and decrypting configured attributes.
pub struct CryptHooks<A> {
    engine: Arc<CryptEngine>,
    access: A,
}

impl<A> CryptHooks<A> {
    /// Creates hooks sharing `engine`.
    pub const fn new(engine: Arc<CryptEngine>, access: A) -> Self {
        Self { engine, access }
    }

    /// The shared engine.
    pub fn engine(&self) -> &CryptEngine {
        &self.engine
    }

    /// Encrypts configured attributes before a record is first stored.
    pub fn on_create<R: ?Sized>(&self, record: &mut R)
    where
        A: AttributeAccess<R>,
    {
        self.transform(record, |value| Some(self.engine.encrypt_value(value)));
    }

    /// Encrypts configured attributes before a record is updated.
    pub fn on_update<R: ?Sized>(&self, record: &mut R)
    where
        A: AttributeAccess<R>,
    {
        self.transform(record, |value| Some(self.engine.encrypt_value(value)));
    }

    /// Decrypts configured attributes after a record is loaded. Values that
    /// do not decrypt are kept.
    pub fn on_load<R: ?Sized>(&self, record: &mut R)
    where
        A: AttributeAccess<R>,
    {
        self.transform(record, |value| self.engine.decrypt_value(value));
    }

    fn transform<R: ?Sized>(&self, record: &mut R, op: impl Fn(&Value) -> Option<Value>)
    where
        A: AttributeAccess<R>,
    {
        let record_type = self.access.record_type(record).into_owned();
        let configured = self.engine.protected_attributes(&record_type);
        if configured.is_empty() {
            return;
        }

        let mut attributes = self.access.extract(record);
        attributes.retain(|name, _| configured.contains(name));
        if attributes.is_empty() {
            return;
        }

        for value in attributes.values_mut() {
            if let Some(replacement) = op(value) {
                *value = replacement;
            }
        }
        tracing::trace!(
            record_type = %record_type,
            attributes = attributes.len(),
            "hydrating record"
        );
        self.access.hydrate(record, attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_cipher::BlockCipher;
    use crate::field_selection::FieldSelection;
    use crate::scheme::CipherScheme;
    use secrecy::SecretString;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Customer {
        name: String,
        email: Option<String>,
        ssn: String,
    }

    impl Encryptable for Customer {
        const RECORD_TYPE: &'static str = "Customer";

        fn extract_attributes(&self) -> AttributeMap {
            let mut map = AttributeMap::new();
            map.insert("name".to_string(), json!(self.name));
            map.insert("email".to_string(), json!(self.email));
            map.insert("ssn".to_string(), json!(self.ssn));
            map
        }

        fn apply_attributes(&mut self, attributes: AttributeMap) {
            for (name, value) in attributes {
                let text = value.as_str().map(str::to_string);
                match name.as_str() {
                    "name" => self.name = text.unwrap_or_default(),
                    "email" => self.email = text,
                    "ssn" => self.ssn = text.unwrap_or_default(),
                    _ => {}
                }
            }
        }
    }

    struct Order {
        card: String,
    }

    impl Encryptable for Order {
        const RECORD_TYPE: &'static str = "Order";

        fn extract_attributes(&self) -> AttributeMap {
            AttributeMap::from([("card".to_string(), json!(self.card))])
        }

        fn apply_attributes(&mut self, attributes: AttributeMap) {
            if let Some(Value::String(card)) = attributes.get("card") {
                self.card.clone_from(card);
            }
        }
    }

    /// Records as loosely typed maps carrying their type under `_type`.
    struct MapAccess;

    impl AttributeAccess<AttributeMap> for MapAccess {
        fn record_type<'r>(&self, record: &'r AttributeMap) -> Cow<'r, str> {
            record.get("_type").and_then(Value::as_str).map_or(Cow::Borrowed(""), Cow::Borrowed)
        }

        fn extract(&self, record: &AttributeMap) -> AttributeMap {
            record.clone()
        }

        fn hydrate(&self, record: &mut AttributeMap, attributes: AttributeMap) {
            record.extend(attributes);
        }
    }

    fn engine() -> Arc<CryptEngine> {
        let scheme = CipherScheme::BlockCipher(
            BlockCipher::new(&SecretString::new("hooks key".to_string())).unwrap(),
        );
        let selection = FieldSelection::from_entities(&[
            json!({"class": "Customer", "properties": ["email", "ssn"]}),
        ]);
        Arc::new(CryptEngine::new(scheme, selection))
    }

    fn alice() -> Customer {
        Customer {
            name: "Alice".to_string(),
            email: Some("alice@example.com".to_string()),
            ssn: "123-45-6789".to_string(),
        }
    }

    #[test]
    fn test_create_then_load() {
        let hooks = CryptHooks::new(engine(), EncryptableAccess);
        let mut customer = alice();

        hooks.on_create(&mut customer);
        assert_eq!(customer.name, "Alice");
        assert_ne!(customer.ssn, "123-45-6789");
        assert!(hooks.engine().is_encrypted(customer.email.as_deref().unwrap()));

        hooks.on_load(&mut customer);
        assert_eq!(customer, alice());
    }

    #[test]
    fn test_update_encrypts_again() {
        let hooks = CryptHooks::new(engine(), EncryptableAccess);
        let mut customer = alice();
        hooks.on_update(&mut customer);
        assert_eq!(hooks.engine().decrypt(&customer.ssn).as_deref(), Some("123-45-6789"));
    }

    #[test]
    fn test_empty_values_untouched() {
        let hooks = CryptHooks::new(engine(), EncryptableAccess);
        let mut customer = Customer { name: "Bob".to_string(), email: None, ssn: String::new() };
        hooks.on_create(&mut customer);
        assert_eq!(customer.email, None);
        assert_eq!(customer.ssn, "");
    }

    #[test]
    fn test_load_keeps_plaintext() {
        let hooks = CryptHooks::new(engine(), EncryptableAccess);
        let mut customer = alice();
        hooks.on_load(&mut customer);
        assert_eq!(customer, alice());
    }

    #[test]
    fn test_unconfigured_type_untouched() {
        let hooks = CryptHooks::new(engine(), EncryptableAccess);
        let mut order = Order { card: "4111".to_string() };
        hooks.on_create(&mut order);
        assert_eq!(order.card, "4111");
    }

    #[test]
    fn test_custom_access() {
        let hooks = CryptHooks::new(engine(), MapAccess);
        let mut record = AttributeMap::from([
            ("_type".to_string(), json!("Customer")),
            ("ssn".to_string(), json!(4111)),
            ("note".to_string(), json!("visible")),
        ]);

        hooks.on_create(&mut record);
        assert_eq!(record["note"], json!("visible"));
        assert!(record["ssn"].is_string());

        hooks.on_load(&mut record);
        assert_eq!(record["ssn"], json!("4111"));
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CryptEngine>();
        assert_send_sync::<CryptHooks<EncryptableAccess>>();
    }
}
