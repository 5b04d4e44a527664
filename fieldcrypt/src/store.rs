//! Record store abstraction consumed by batch runs.

use crate::error::StoreError;
use std::collections::BTreeMap;

pub use serde_json::Value;

/// Attribute name to value map, as extracted from or applied to a record.
pub type AttributeMap = BTreeMap<String, Value>;

/// A persistence layer able to stream records of a type and write back
/// partial attribute changes.
///
/// A batch run borrows the store mutably for its whole duration, so an
/// implementation can buffer writes without locking.
pub trait RecordStore {
    /// Handle to a streamed record.
    type Record;

    /// Lazy, finite, non-restartable sequence of records.
    type Stream: Iterator<Item = Result<Self::Record, StoreError>>;

    /// Streams every record of `record_type` in the store's natural order.
    ///
    /// Returns `Ok(None)` when the store does not know the record type.
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened.
    fn stream_all(&mut self, record_type: &str) -> Result<Option<Self::Stream>, StoreError>;

    /// Returns the attributes of `record`.
    fn extract_attributes(&self, record: &Self::Record) -> AttributeMap;

    /// Merges `changes` into `record` in memory and queues them for the next
    /// commit. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns error if the record can no longer accept changes.
    fn apply_attributes(
        &mut self,
        record: &Self::Record,
        changes: AttributeMap,
    ) -> Result<(), StoreError>;

    /// Drops cached record state to bound memory. Queued changes survive
    /// until the next commit.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to release its state.
    fn release_buffered_state(&mut self) -> Result<(), StoreError>;

    /// Persists every queued change.
    ///
    /// # Errors
    ///
    /// Returns error if the changes cannot be written.
    fn commit_buffered_writes(&mut self) -> Result<(), StoreError>;
}

/// Whether `value` is one of the values never encrypted or decrypted:
/// `null`, `false`, numeric zero, the empty string or the string `"0"`.
#[must_use]
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        _ => false,
    }
}

/// The text a cipher operates on for `value`: strings as-is and non-zero
/// numbers in decimal form. Falsy values, `true`, arrays and objects have
/// none.
#[must_use]
pub fn cipher_text(value: &Value) -> Option<String> {
    if is_falsy(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
