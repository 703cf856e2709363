//! Schema diffing between the stored entity record and the field list the
//! current run derived from the feed.
//!
//! Three changes are absorbed automatically: new fields are appended,
//! vanished fields are disabled in place, and renames are applied in
//! place. A type change is never absorbed; it aborts the run.

use tracing::{debug, info};

use crate::error::IngestError;
use crate::metadata::{Entity, Field};

/// A rename or type change of one existing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub id: String,
    pub old_name: String,
    pub new_name: String,
    pub old_type: String,
    pub new_type: String,
}

/// Differences between stored fields and the freshly derived field list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    /// Fields the feed declares that the entity does not have yet.
    pub only_in_new: Vec<Field>,
    /// Ids of enabled stored fields the feed no longer declares.
    pub only_in_old: Vec<String>,
    /// Fields present on both sides whose name or type differs.
    pub changed: Vec<FieldChange>,
}

impl SchemaDiff {
    /// Whether the diff carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.only_in_new.is_empty() && self.only_in_old.is_empty() && self.changed.is_empty()
    }
}

/// Computes the diff of `fields` against the entity's stored schema.
///
/// Fields are matched by id. Disabled stored fields that the feed still
/// omits produce no entry; a disabled field the feed declares again shows
/// up in `changed` only if its name or type also moved, and in
/// `only_in_new` never (re-enabling is not supported, the id is taken).
#[must_use]
pub fn diff_fields(entity: &Entity, fields: &[Field]) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for field in fields {
        match entity.field(&field.id) {
            None => diff.only_in_new.push(field.clone()),
            Some(stored) => {
                if stored.name != field.name || stored.field_type != field.field_type {
                    diff.changed.push(FieldChange {
                        id: field.id.clone(),
                        old_name: stored.name.clone(),
                        new_name: field.name.clone(),
                        old_type: stored.field_type.clone(),
                        new_type: field.field_type.clone(),
                    });
                }
            }
        }
    }

    for stored in entity.fields() {
        if stored.enabled && !fields.iter().any(|f| f.id == stored.id) {
            diff.only_in_old.push(stored.id.clone());
        }
    }

    diff
}

/// Applies a diff to the entity.
///
/// New fields are appended with a fresh order token, vanished fields are
/// disabled in place, renames are applied in place. When the entity was
/// newly introduced this run (no cached version date existed yet), the
/// disable pass is skipped: an absent field on a first sighting means the
/// stored record predates any observation, not that the field vanished.
///
/// # Errors
///
/// Returns [`IngestError::Schema`] when any change is a type change.
pub fn apply_diff(
    entity: &mut Entity,
    diff: &SchemaDiff,
    newly_introduced: bool,
) -> Result<(), IngestError> {
    for change in &diff.changed {
        if change.old_type != change.new_type {
            return Err(IngestError::schema(
                &entity.id,
                format!(
                    "field {} changed type from {} to {}",
                    change.id, change.old_type, change.new_type
                ),
            ));
        }
    }

    if diff.is_empty() {
        debug!(entity = %entity.id, "schema unchanged");
        return Ok(());
    }

    let entity_id = entity.id.clone();

    for field in &diff.only_in_new {
        let mut added = field.clone();
        added.order = entity.next_order_token();
        info!(entity = %entity_id, field = %added.id, order = %added.order, "adding field");
        entity.add_field(added);
        entity.mark_dirty();
    }

    if !newly_introduced {
        for id in &diff.only_in_old {
            let disabled = match entity.field_mut(id) {
                Some(field) if field.enabled => {
                    field.enabled = false;
                    true
                }
                _ => false,
            };
            if disabled {
                info!(entity = %entity_id, field = %id, "disabling vanished field");
                entity.mark_dirty();
            }
        }
    }

    for change in &diff.changed {
        let renamed = match entity.field_mut(&change.id) {
            Some(field) if field.name != change.new_name => {
                field.name = change.new_name.clone();
                true
            }
            _ => false,
        };
        if renamed {
            info!(
                entity = %entity_id,
                field = %change.id,
                from = %change.old_name,
                to = %change.new_name,
                "renaming field"
            );
            entity.mark_dirty();
        }
    }

    Ok(())
}
