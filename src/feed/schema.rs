//! Feed schema construction.
//!
//! A feed file declares the fields of each entity version; when none is
//! configured the field list is derived from a sampled data file header
//! with every column typed `string-255`.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::IngestError;
use crate::metadata::Field;

/// One declared field of an entity version, prior to type mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedField {
    pub name: String,
    pub field_type: String,
    pub order: String,
    /// Columns of the feed file beyond the well-known five.
    pub custom: BTreeMap<String, String>,
}

/// Fields per entity, per version, in declared order.
pub type FeedTree = BTreeMap<String, BTreeMap<String, Vec<FeedField>>>;

const FEED_COLUMNS: [&str; 5] = ["file", "version", "field", "type", "order"];

/// Replaces every character outside `[A-Za-z0-9_]` with an underscore, so
/// `#field` becomes `_field`.
#[must_use]
pub fn sanitize_field_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Maps a declared source type onto the storage type vocabulary.
///
/// Already-parameterized `string-*` and `decimal-*` types pass through
/// unchanged; bare names get canonical parameters.
///
/// # Errors
///
/// Returns [`IngestError::Schema`] for a type outside the vocabulary.
pub fn map_field_type(raw: &str, entity: &str) -> Result<String, IngestError> {
    let lowered = raw.trim().to_lowercase();
    if let Some(rest) = lowered.strip_prefix("string-") {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return Ok(lowered);
        }
    }
    if let Some(rest) = lowered.strip_prefix("decimal-") {
        if rest.split('-').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
            return Ok(lowered);
        }
    }
    let mapped = match lowered.as_str() {
        "string" | "varchar" | "text" => "string-255",
        "integer" | "int" | "bigint" => "integer",
        "numeric" | "decimal" | "number" => "decimal-16-4",
        "boolean" | "bool" => "boolean",
        "date" | "date-false" | "time-false" => "date-false",
        "datetime" | "date-true" | "time-true" => "date-true",
        "timestamp" => "timestamp",
        "time" => "time",
        _ => {
            return Err(IngestError::schema(
                entity,
                format!("unknown field type {raw:?}"),
            ));
        }
    };
    Ok(mapped.to_string())
}

/// Parses a local copy of the feed file into a [`FeedTree`].
///
/// The feed file is comma-separated with a header row; columns beyond the
/// well-known five land in [`FeedField::custom`]. Fields are returned in
/// numeric `order`; a non-numeric order is a configuration error.
///
/// # Errors
///
/// Returns [`IngestError::Configuration`] for an unreadable or malformed
/// feed file.
pub fn parse_feed_file(local: &Path) -> Result<FeedTree, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(local)
        .map_err(|e| {
            IngestError::configuration(format!("cannot open feed file {}: {e}", local.display()))
        })?;
    let headers = reader
        .headers()
        .map_err(|e| IngestError::configuration(format!("feed file has no header row: {e}")))?
        .clone();

    let mut tree: FeedTree = BTreeMap::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            IngestError::configuration(format!("malformed feed row {}: {e}", index + 2))
        })?;
        let get = |column: &str| {
            headers
                .iter()
                .position(|h| h == column)
                .and_then(|at| record.get(at))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let entity = get("file").ok_or_else(|| {
            IngestError::configuration(format!("feed row {} has no file column", index + 2))
        })?;
        let version = get("version").unwrap_or("default");
        let field = get("field").ok_or_else(|| {
            IngestError::configuration(format!("feed row {} has no field column", index + 2))
        })?;
        let field_type = get("type").unwrap_or("string");
        let order = get("order").unwrap_or("0");
        order.parse::<u64>().map_err(|_| {
            IngestError::configuration(format!(
                "feed row {} has non-numeric order {order:?}",
                index + 2
            ))
        })?;

        let mut custom = BTreeMap::new();
        for (position, header) in headers.iter().enumerate() {
            if FEED_COLUMNS.contains(&header) {
                continue;
            }
            if let Some(value) = record.get(position).map(str::trim).filter(|v| !v.is_empty()) {
                custom.insert(header.to_string(), value.to_string());
            }
        }

        tree.entry(entity.to_string())
            .or_default()
            .entry(version.to_string())
            .or_default()
            .push(FeedField {
                name: field.to_string(),
                field_type: field_type.to_string(),
                order: order.to_string(),
                custom,
            });
    }

    for versions in tree.values_mut() {
        for fields in versions.values_mut() {
            fields.sort_by_key(|f| f.order.parse::<u64>().unwrap_or(0));
        }
    }
    debug!(entities = tree.len(), "parsed feed file");
    Ok(tree)
}

/// Derives a field list from a data file header. Every column is typed
/// `string-255` and ordered by position.
#[must_use]
pub fn columns_from_header(header: &str) -> Vec<FeedField> {
    header
        .split(',')
        .enumerate()
        .map(|(index, column)| FeedField {
            name: column.trim().to_string(),
            field_type: "string-255".to_string(),
            order: index.to_string(),
            custom: BTreeMap::new(),
        })
        .collect()
}

/// Turns declared feed fields into entity fields: names sanitized, types
/// mapped, order tokens preserved.
///
/// # Errors
///
/// Returns [`IngestError::Schema`] when a field type cannot be mapped.
pub fn build_fields(entity: &str, declared: &[FeedField]) -> Result<Vec<Field>, IngestError> {
    let mut fields = Vec::with_capacity(declared.len());
    for feed_field in declared {
        let name = sanitize_field_name(&feed_field.name);
        let mut field = Field::new(
            &name,
            &name,
            &feed_field.order,
            &map_field_type(&feed_field.field_type, entity)?,
        );
        field.custom.extend(
            feed_field
                .custom
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        fields.push(field);
    }
    Ok(fields)
}
