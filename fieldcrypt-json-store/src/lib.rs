//! JSON-Lines record store for `fieldcrypt`.
//!
//! Each record type lives in its own file holding one JSON object per line.
//! It is suitable for development, testing, and exports:
//! ```text
//! data/
//! ├── Customer.jsonl
//! └── Employee.jsonl
//! ```

#![warn(clippy::pedantic, clippy::nursery)]

use fieldcrypt::store::{AttributeMap, RecordStore, Value};
use fieldcrypt::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "jsonl";

/// A record read from a `.jsonl` file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    record_type: String,
    line: usize,
    attributes: AttributeMap,
}

impl StoredRecord {
    /// Record type, which is also the file stem.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Zero-based line number of the record in its file.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    /// Attributes as read from the file.
    #[must_use]
    pub const fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }
}

/// Lazily reads the records of one file.
pub struct JsonLinesStream {
    record_type: String,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for JsonLinesStream {
    type Item = Result<StoredRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(StoreError::Io(e))),
            };
            let number = self.line;
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_line(&line)
                .map(|attributes| StoredRecord {
                    record_type: self.record_type.clone(),
                    line: number,
                    attributes,
                })
                .map_err(|e| malformed(&self.path, number, &e));
            return Some(record);
        }
    }
}

/// Record store over a directory of JSON-Lines files.
///
/// Changes are buffered per line and written on commit by rewriting each
/// touched file through a temporary file and an atomic rename. Untouched
/// lines are copied byte for byte and rewritten lines keep their original
/// line ending.
pub struct JsonLinesStore {
    dir: PathBuf,
    cache: HashMap<(String, usize), AttributeMap>,
    pending: BTreeMap<String, BTreeMap<usize, AttributeMap>>,
    commits: usize,
    releases: usize,
}

impl JsonLinesStore {
    /// Opens the store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(StoreError::Backend(format!(
                "store directory does not exist: {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            cache: HashMap::new(),
            pending: BTreeMap::new(),
            commits: 0,
            releases: 0,
        })
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `record_type`.
    ///
    /// # Errors
    ///
    /// Returns error if `record_type` cannot be used as a file name.
    pub fn path_for(&self, record_type: &str) -> Result<PathBuf, StoreError> {
        let valid = !record_type.is_empty()
            && record_type != "."
            && record_type != ".."
            && !record_type.contains(['/', '\\']);
        if !valid {
            return Err(StoreError::Backend(format!("invalid record type name: {record_type:?}")));
        }
        Ok(self.dir.join(format!("{record_type}.{EXTENSION}")))
    }

    /// Reads every record of `record_type`; empty for an unknown type.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or holds a malformed line.
    pub fn read_all(&mut self, record_type: &str) -> Result<Vec<AttributeMap>, StoreError> {
        self.stream_all(record_type)?
            .map_or_else(|| Ok(Vec::new()), |stream| {
                stream.map(|record| record.map(|r| r.attributes)).collect()
            })
    }

    /// Number of commits so far.
    #[must_use]
    pub const fn commits(&self) -> usize {
        self.commits
    }

    /// Number of buffer releases so far.
    #[must_use]
    pub const fn releases(&self) -> usize {
        self.releases
    }

    /// Number of records with uncommitted changes.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    fn rewrite(
        &self,
        record_type: &str,
        changes: &BTreeMap<usize, AttributeMap>,
    ) -> Result<(), StoreError> {
        let path = self.path_for(record_type)?;
        let mut source = BufReader::new(File::open(&path)?);
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let mut raw = String::new();
            let mut number = 0;
            while source.read_line(&mut raw)? > 0 {
                let (line, terminator) = split_terminator(&raw);
                match changes.get(&number) {
                    Some(delta) => {
                        let mut attributes =
                            parse_line(line).map_err(|e| malformed(&path, number, &e))?;
                        attributes.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
                        let encoded = serde_json::to_string(&attributes)
                            .map_err(|e| StoreError::Malformed(e.to_string()))?;
                        write!(writer, "{encoded}{terminator}")?;
                    }
                    None => writer.write_all(raw.as_bytes())?,
                }
                raw.clear();
                number += 1;
            }
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        fs::set_permissions(temp.path(), fs::metadata(&path)?.permissions())?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        tracing::debug!(path = %path.display(), records = changes.len(), "rewrote record file");
        Ok(())
    }
}

impl RecordStore for JsonLinesStore {
    type Record = StoredRecord;
    type Stream = JsonLinesStream;

    fn stream_all(&mut self, record_type: &str) -> Result<Option<Self::Stream>, StoreError> {
        let path = self.path_for(record_type)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Some(JsonLinesStream {
            record_type: record_type.to_string(),
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
        }))
    }

    fn extract_attributes(&self, record: &StoredRecord) -> AttributeMap {
        self.cache
            .get(&(record.record_type.clone(), record.line))
            .unwrap_or(&record.attributes)
            .clone()
    }

    fn apply_attributes(
        &mut self,
        record: &StoredRecord,
        changes: AttributeMap,
    ) -> Result<(), StoreError> {
        let key = (record.record_type.clone(), record.line);
        let cached = self.cache.entry(key).or_insert_with(|| record.attributes.clone());
        cached.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.pending
            .entry(record.record_type.clone())
            .or_default()
            .entry(record.line)
            .or_default()
            .extend(changes);
        Ok(())
    }

    fn release_buffered_state(&mut self) -> Result<(), StoreError> {
        self.cache.clear();
        self.releases += 1;
        Ok(())
    }

    fn commit_buffered_writes(&mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        for (record_type, changes) in &pending {
            self.rewrite(record_type, changes)?;
        }
        self.commits += 1;
        Ok(())
    }
}

fn malformed(path: &Path, line: usize, reason: &str) -> StoreError {
    StoreError::Malformed(format!("{} line {}: {reason}", path.display(), line + 1))
}

/// Splits `raw` into its content and line ending, matching how
/// [`BufRead::lines`] numbers and strips lines.
fn split_terminator(raw: &str) -> (&str, &str) {
    let content = raw
        .strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw);
    raw.split_at(content.len())
}

fn parse_line(line: &str) -> Result<AttributeMap, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(format!("expected a JSON object, found {other}")),
        Err(e) => Err(e.to_string()),
    }
}
