//! Entity and field schema model.
//!
//! An entity is a named tabular data set whose field schema is tracked
//! across runs. The `dirty` flag gates persistence: an entity is only
//! saved when diffing or metadata attachment actually changed it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single column of an entity schema.
///
/// Disabling never deletes: the field keeps its position and order token
/// with `enabled` flipped off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Stable field identifier.
    pub id: String,
    /// Display name; may be renamed in place by the diff engine.
    pub name: String,
    /// Order token; assigned once when the field is added.
    pub order: String,
    /// Declared type, e.g. `string-255` or `decimal-16-4`.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Whether the field participates in column-count checks.
    pub enabled: bool,
    /// Feed-declared ad hoc attributes.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl Field {
    /// Creates an enabled field with no custom attributes.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        order: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order: order.into(),
            field_type: field_type.into(),
            enabled: true,
            custom: BTreeMap::new(),
        }
    }
}

/// A tracked tabular data set with an ordered, unique field schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable entity identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Schema version this record tracks (`default` when unversioned).
    pub version: String,
    /// Whether the entity is ingested at all.
    pub enabled: bool,
    /// Parsing hints and other persistent key-value attributes.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    /// Per-run provenance attached after each processed file.
    #[serde(default)]
    pub runtime: BTreeMap<String, Value>,
    fields: Vec<Field>,
    #[serde(skip)]
    dirty: bool,
}

impl Entity {
    /// Creates an enabled entity with no fields.
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            enabled: true,
            custom: BTreeMap::new(),
            runtime: BTreeMap::new(),
            fields: Vec::new(),
            dirty: false,
        }
    }

    /// Returns the ordered field list.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns a field by id.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Returns a mutable field by id.
    pub fn field_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.id == id)
    }

    /// Number of enabled fields, the expected data column count.
    #[must_use]
    pub fn enabled_field_count(&self) -> usize {
        self.fields.iter().filter(|f| f.enabled).count()
    }

    /// Appends a field at the end of the current ordering. A field with a
    /// duplicate id is ignored; ids are unique within an entity.
    pub fn add_field(&mut self, field: Field) {
        if self.field(&field.id).is_none() {
            self.fields.push(field);
        }
    }

    /// Produces a fresh order token one past the highest existing one,
    /// preserving any alphabetic prefix (`g1` yields `g2`, `7` yields `8`).
    #[must_use]
    pub fn next_order_token(&self) -> String {
        let mut best: Option<(&str, i64)> = None;
        for field in &self.fields {
            let split = field.order.find(|c: char| c.is_ascii_digit());
            let (prefix, digits) = match split {
                Some(at) => field.order.split_at(at),
                None => continue,
            };
            if let Ok(value) = digits.parse::<i64>() {
                if best.is_none_or(|(_, current)| value > current) {
                    best = Some((prefix, value));
                }
            }
        }
        match best {
            Some((prefix, value)) => format!("{prefix}{}", value + 1),
            None => "0".to_string(),
        }
    }

    /// Marks the entity as needing persistence.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag after a successful save.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether the entity has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sets a custom attribute, marking the entity dirty only when the
    /// stored value actually changes.
    pub fn set_custom(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if self.custom.get(&key) != Some(&value) {
            self.custom.insert(key, value);
            self.dirty = true;
        }
    }

    /// Sets a runtime metadata value. Runtime metadata is per-run
    /// provenance and does not mark the entity dirty by itself.
    pub fn set_runtime(&mut self, key: impl Into<String>, value: Value) {
        self.runtime.insert(key.into(), value);
    }
}
