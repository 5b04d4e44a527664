//! # `fieldcrypt`
//!
//! Configuration-driven field-level encryption for persisted records.
//!
//! ## Features
//!
//! - Two interchangeable cipher schemes: a symmetric block cipher
//!   (AES-256-GCM) and a public/private key pair whose private key is kept
//!   passphrase protected on disk
//! - Per record type selection of the attributes to protect
//! - Lifecycle hooks encrypting on create/update and decrypting on load
//! - Batch encryption, decryption and scheme-to-scheme re-encryption over
//!   any [`RecordStore`](store::RecordStore), with dry runs
//!
//! Encryption fails open and decryption fails closed: a value that cannot be
//! encrypted is stored as it is, and a value that cannot be decrypted is
//! reported as `None`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldcrypt::prelude::*;
//!
//! let config = CryptConfig::load("fieldcrypt.toml")?;
//! let engine = CryptEngine::from_config(&config)?;
//!
//! let ciphertext = engine.encrypt("alice@example.com");
//! let plaintext = engine.decrypt(&ciphertext);
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod block_cipher;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod field_selection;
pub mod hooks;
pub mod kdf;
pub mod key_pair;
pub mod reencrypt;
pub mod scheme;
pub mod store;

pub use error::{Error, StoreError};

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::batch::{
        AssumeYes, BatchOptions, BatchProcessor, BatchReport, Confirmation, RunOutcome,
        SkipReason, Transform, TypeReport, TypeStatus,
    };
    pub use crate::config::{CryptConfig, CryptMethod};
    pub use crate::engine::CryptEngine;
    pub use crate::error::{Error, StoreError};
    pub use crate::field_selection::FieldSelection;
    pub use crate::hooks::{AttributeAccess, CryptHooks, Encryptable, EncryptableAccess};
    pub use crate::reencrypt::ReEncryption;
    pub use crate::store::{AttributeMap, RecordStore, Value};
}
