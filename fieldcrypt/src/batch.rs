//! Bulk encryption, decryption and re-encryption over a [`RecordStore`].
//!
//! A run walks every configured record type in configuration order and
//! streams its records one at a time. Store state is released every
//! `chunk_size` records so memory stays bounded; changes are committed once
//! per record type. Dry runs compute and count changes without applying
//! them.

use crate::config::{CryptConfig, DEFAULT_BATCH_SIZE};
use crate::engine::CryptEngine;
use crate::error::Error;
use crate::field_selection::FieldSelection;
use crate::store::{cipher_text, AttributeMap, RecordStore, Value};
use std::collections::BTreeSet;
use std::io;

/// Prompt shown before a run that modifies stored records.
pub const CONFIRMATION_PROMPT: &str = "This will change the stored records for the entities in \
     your configuration.\nPlease ensure you have a backup before continuing.\nDo you wish to \
     continue?";

/// Options controlling a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Compute and report changes without writing them.
    pub dry_run: bool,
    /// Records streamed between store buffer releases.
    pub chunk_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { dry_run: false, chunk_size: DEFAULT_BATCH_SIZE }
    }
}

impl BatchOptions {
    /// Options using the configured batch size.
    #[must_use]
    pub fn from_config(config: &CryptConfig) -> Self {
        Self { dry_run: false, chunk_size: config.batch_size() }
    }

    /// Sets dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the chunk size; zero is treated as one.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// The per-value operation of a run.
#[derive(Clone, Copy)]
pub enum Transform<'a> {
    /// Encrypt values not already encrypted.
    Encrypt(&'a CryptEngine),
    /// Decrypt values; values that do not decrypt are left alone.
    Decrypt(&'a CryptEngine),
    /// Decrypt with `source`, then encrypt with `target`.
    ReEncrypt {
        /// Engine the stored values are currently encrypted with.
        source: &'a CryptEngine,
        /// Engine the values end up encrypted with.
        target: &'a CryptEngine,
    },
}

impl<'a> Transform<'a> {
    /// Field selection driving the run. Re-encryption uses the target's.
    #[must_use]
    pub const fn selection(&self) -> &'a FieldSelection {
        match *self {
            Self::Encrypt(engine) | Self::Decrypt(engine) => engine.selection(),
            Self::ReEncrypt { target, .. } => target.selection(),
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Encrypt(_) => "encrypt",
            Self::Decrypt(_) => "decrypt",
            Self::ReEncrypt { .. } => "re-encrypt",
        }
    }

    /// Computes the replacement for a stored value, or `None` when the value
    /// stays as it is. Falsy and non-scalar values never change.
    #[must_use]
    pub fn apply(&self, value: &Value) -> Option<Value> {
        let text = cipher_text(value)?;
        match self {
            Self::Encrypt(engine) => {
                if engine.is_encrypted(&text) {
                    return None;
                }
                Some(Value::String(engine.encrypt(&text)))
            }
            Self::Decrypt(engine) => engine.decrypt(&text).map(Value::String),
            Self::ReEncrypt { source, target } => {
                let plain = source.decrypt(&text).unwrap_or_else(|| text.clone());
                if target.is_encrypted(&plain) {
                    return None;
                }
                let sealed = target.encrypt(&plain);
                (sealed != text).then_some(Value::String(sealed))
            }
        }
    }
}

/// Asks the operator whether a modifying run may proceed.
pub trait Confirmation {
    /// Shows `message` and returns the answer.
    ///
    /// # Errors
    ///
    /// Returns error if the answer cannot be read.
    fn confirm(&mut self, message: &str) -> io::Result<bool>;
}

/// Answers yes without asking, for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm(&mut self, _message: &str) -> io::Result<bool> {
        Ok(true)
    }
}

impl<F> Confirmation for F
where
    F: FnMut(&str) -> io::Result<bool>,
{
    fn confirm(&mut self, message: &str) -> io::Result<bool> {
        self(message)
    }
}

/// Why a record type was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The configuration lists no attributes for the type.
    NoAttributes,
    /// The store does not know the type.
    UnknownRecordType,
}

/// Result for one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeStatus {
    /// Records were streamed.
    Processed {
        /// Records with at least one changed attribute.
        processed: usize,
        /// Records streamed.
        total: usize,
    },
    /// The type was skipped.
    Skipped(SkipReason),
}

/// Outcome of one record type in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeReport {
    /// The record type.
    pub record_type: String,
    /// What happened to it.
    pub status: TypeStatus,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Whether changes were withheld.
    pub dry_run: bool,
    /// One entry per configured record type, in configuration order.
    pub types: Vec<TypeReport>,
}

impl BatchReport {
    /// Records changed (or, in a dry run, that would change) across all types.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.types
            .iter()
            .map(|report| match report.status {
                TypeStatus::Processed { processed, .. } => processed,
                TypeStatus::Skipped(_) => 0,
            })
            .sum()
    }

    /// Status reported for `record_type`.
    #[must_use]
    pub fn status_of(&self, record_type: &str) -> Option<TypeStatus> {
        self.types.iter().find(|report| report.record_type == record_type).map(|r| r.status)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every record type was visited.
    Completed(BatchReport),
    /// The operator declined; nothing was read or written.
    Declined,
}

/// Drives a [`Transform`] over every configured record type of a store.
pub struct BatchProcessor<'s, S: RecordStore> {
    store: &'s mut S,
    options: BatchOptions,
}

impl<'s, S: RecordStore> BatchProcessor<'s, S> {
    /// Creates a processor borrowing `store` for the duration of its runs.
    pub fn new(store: &'s mut S, options: BatchOptions) -> Self {
        Self { store, options }
    }

    /// The options of this processor.
    pub const fn options(&self) -> BatchOptions {
        self.options
    }

    /// Runs `transform` over every configured record type.
    ///
    /// Modifying runs ask `confirmation` first; dry runs do not.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoEntities` when nothing is configured,
    /// `Error::Confirmation` when the prompt cannot be answered, and
    /// `Error::Store` on any store failure, which aborts the run.
    pub fn run(
        &mut self,
        transform: &Transform<'_>,
        confirmation: &mut dyn Confirmation,
    ) -> Result<RunOutcome, Error> {
        let selection = transform.selection();
        if selection.is_empty() {
            return Err(Error::NoEntities);
        }

        if !self.options.dry_run
            && !confirmation.confirm(CONFIRMATION_PROMPT).map_err(Error::Confirmation)?
        {
            tracing::info!(transform = transform.label(), "run declined, no records changed");
            return Ok(RunOutcome::Declined);
        }

        let mut report = BatchReport {
            dry_run: self.options.dry_run,
            types: Vec::with_capacity(selection.len()),
        };
        for (record_type, attributes) in selection.record_types() {
            let status = self.process_type(transform, record_type, attributes)?;
            report.types.push(TypeReport { record_type: record_type.to_string(), status });
        }
        Ok(RunOutcome::Completed(report))
    }

    fn process_type(
        &mut self,
        transform: &Transform<'_>,
        record_type: &str,
        attributes: &BTreeSet<String>,
    ) -> Result<TypeStatus, Error> {
        if attributes.is_empty() {
            tracing::warn!(record_type, "no properties specified for record type in config");
            self.store.release_buffered_state()?;
            return Ok(TypeStatus::Skipped(SkipReason::NoAttributes));
        }

        let Some(stream) = self.store.stream_all(record_type)? else {
            tracing::warn!(record_type, "record type not found in store");
            self.store.release_buffered_state()?;
            return Ok(TypeStatus::Skipped(SkipReason::UnknownRecordType));
        };

        tracing::info!(record_type, transform = transform.label(), "processing record type");
        let dry_run = self.options.dry_run;
        let chunk_size = self.options.chunk_size.max(1);
        let mut total = 0usize;
        let mut processed = 0usize;

        for record in stream {
            let record = record?;
            total += 1;

            if let Some(changes) = self.changes_for(transform, &record, attributes) {
                if !dry_run {
                    self.store.apply_attributes(&record, changes)?;
                }
                processed += 1;
            }

            if total % chunk_size == 0 {
                if dry_run {
                    self.store.commit_buffered_writes()?;
                }
                self.store.release_buffered_state()?;
                tracing::trace!(record_type, total, "released store buffer");
            }
        }

        if dry_run {
            tracing::info!(record_type, "dry run, records not updated in store");
        } else {
            self.store.commit_buffered_writes()?;
        }
        self.store.release_buffered_state()?;

        tracing::info!(record_type, processed, total, "processed records for record type");
        Ok(TypeStatus::Processed { processed, total })
    }

    fn changes_for(
        &self,
        transform: &Transform<'_>,
        record: &S::Record,
        attributes: &BTreeSet<String>,
    ) -> Option<AttributeMap> {
        let present = self.store.extract_attributes(record);
        let mut found = false;
        let mut changes = AttributeMap::new();

        for name in attributes {
            let Some(value) = present.get(name) else {
                continue;
            };
            found = true;
            if let Some(replacement) = transform.apply(value) {
                changes.insert(name.clone(), replacement);
            }
        }

        if !found {
            tracing::debug!("no configured attributes found on record");
            return None;
        }
        if changes.is_empty() {
            tracing::debug!("no attributes to update on record");
            return None;
        }
        Some(changes)
    }
}
