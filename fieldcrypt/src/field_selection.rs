//! Mapping of record types to the attributes that must be protected.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

static NO_ATTRIBUTES: BTreeSet<String> = BTreeSet::new();

/// Record types and their protected attribute names, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    entries: Vec<(String, BTreeSet<String>)>,
    index: HashMap<String, usize>,
    protected: BTreeSet<String>,
}

impl FieldSelection {
    /// Builds the selection from the `entities` configuration list.
    ///
    /// Each entry must be a map with a string `class` and a `properties`
    /// sequence; anything else is skipped. Non-string property names are
    /// ignored and repeated classes are merged.
    #[must_use]
    pub fn from_entities(entities: &[Value]) -> Self {
        let mut selection = Self::default();
        for (position, entity) in entities.iter().enumerate() {
            let Some((class, properties)) = parse_entity(entity) else {
                tracing::debug!(position, "ignoring malformed entities entry");
                continue;
            };
            selection.insert(class, properties);
        }
        selection
    }

    /// Adds attribute names for a record type, merging with earlier entries.
    pub fn insert<I, S>(&mut self, record_type: &str, attributes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let position = match self.index.get(record_type) {
            Some(&position) => position,
            None => {
                self.entries.push((record_type.to_string(), BTreeSet::new()));
                self.index.insert(record_type.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        for attribute in attributes {
            let attribute = attribute.into();
            self.protected.insert(attribute.clone());
            self.entries[position].1.insert(attribute);
        }
    }

    /// Protected attributes of `record_type`; empty for unknown types.
    #[must_use]
    pub fn attributes_for(&self, record_type: &str) -> &BTreeSet<String> {
        self.index.get(record_type).map_or(&NO_ATTRIBUTES, |&position| &self.entries[position].1)
    }

    /// Configured record types with their attributes, in configuration order.
    pub fn record_types(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entries.iter().map(|(name, attributes)| (name.as_str(), attributes))
    }

    /// Union of all protected attribute names across record types.
    #[must_use]
    pub const fn protected_names(&self) -> &BTreeSet<String> {
        &self.protected
    }

    /// Whether `name` is protected for any record type.
    #[must_use]
    pub fn is_protected_name(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Number of configured record types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no record type is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entity(entity: &Value) -> Option<(&str, impl Iterator<Item = &str>)> {
    let map = entity.as_object()?;
    let class = map.get("class")?.as_str()?;
    let properties = map.get("properties")?.as_array()?;
    Some((class, properties.iter().filter_map(Value::as_str)))
}
