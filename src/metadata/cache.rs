//! Cross-run cache of the last known date per entity-version.
//!
//! When the active manifest carries no fresher information for an entity
//! version, the orchestrator falls back to this cache instead of failing.
//! The cache is loaded lazily once per run, mutated only by the
//! orchestrator thread, and written back at run end only when it changed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::IngestError;

/// Last known date for one entity-version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDate {
    /// Calendar year.
    pub year: i32,
    /// Calendar month (1-12).
    pub month: u32,
    /// Calendar day (1-31).
    pub day: u32,
    /// Epoch seconds of the moment this entry was last refreshed. Entries
    /// written by older cache files load as 0.
    #[serde(default)]
    pub timestamp: i64,
}

impl CacheDate {
    /// Today's date, stamped with the current time.
    #[must_use]
    pub fn today() -> Self {
        Self::from(Utc::now().date_naive())
    }

    /// Converts to a calendar date; `None` for corrupt entries.
    #[must_use]
    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl From<NaiveDate> for CacheDate {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Persisted entity-version → last-known-date map.
///
/// On disk: `{"<entity>-<version>": {"year":Y,"month":M,"day":D}, ...,
/// "update_at": <epoch>}`. Single-writer-per-run; persistence is an atomic
/// overwrite.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheDate>,
    loaded: bool,
    dirty: bool,
}

impl MetadataCache {
    /// Creates a cache bound to a JSON file; nothing is read until the
    /// first lookup.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            loaded: false,
            dirty: false,
        }
    }

    fn key(entity: &str, version: &str) -> String {
        format!("{entity}-{version}")
    }

    fn load_if_needed(&mut self) -> Result<(), IngestError> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no metadata cache on disk, starting empty");
            return Ok(());
        }
        let raw =
            std::fs::read_to_string(&self.path).map_err(|e| IngestError::io(&self.path, e))?;
        let map: BTreeMap<String, Value> = serde_json::from_str(&raw).map_err(|e| {
            IngestError::configuration(format!(
                "corrupt metadata cache {}: {e}",
                self.path.display()
            ))
        })?;
        for (key, value) in map {
            // The update_at bookkeeping timestamp lives beside the entries.
            if key == "update_at" {
                continue;
            }
            let entry: CacheDate = serde_json::from_value(value).map_err(|e| {
                IngestError::configuration(format!("corrupt cache entry {key}: {e}"))
            })?;
            self.entries.insert(key, entry);
        }
        debug!(entries = self.entries.len(), "loaded metadata cache");
        Ok(())
    }

    /// Latest known date for the entity-version, if any. A miss means the
    /// version is newly introduced and history-based disabling is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] or [`IngestError::Configuration`] when
    /// the backing file cannot be read on first access.
    pub fn get(&mut self, entity: &str, version: &str) -> Result<Option<CacheDate>, IngestError> {
        self.load_if_needed()?;
        Ok(self.entries.get(&Self::key(entity, version)).copied())
    }

    /// Records the date for an entity-version, marking the cache dirty
    /// only when the stored value changes.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`get`](Self::get).
    pub fn set(&mut self, entity: &str, version: &str, date: CacheDate) -> Result<(), IngestError> {
        self.load_if_needed()?;
        let key = Self::key(entity, version);
        if self.entries.get(&key) != Some(&date) {
            self.entries.insert(key, date);
            self.dirty = true;
        }
        Ok(())
    }

    /// Whether there are unwritten changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the cache back if anything changed; no-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] when the file cannot be written.
    pub fn persist(&mut self) -> Result<(), IngestError> {
        if !self.dirty {
            return Ok(());
        }
        let mut map = serde_json::Map::new();
        for (key, entry) in &self.entries {
            map.insert(
                key.clone(),
                serde_json::to_value(entry).unwrap_or(Value::Null),
            );
        }
        map.insert(
            "update_at".to_string(),
            Value::from(chrono::Utc::now().timestamp()),
        );
        let json = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| IngestError::configuration(format!("unserializable cache: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| IngestError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| IngestError::io(&self.path, e))?;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "persisted metadata cache");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_miss_on_empty_cache() {
        let temp = TempDir::new().unwrap();
        let mut cache = MetadataCache::new(temp.path().join("cache.json"));
        assert!(cache.get("Event", "1.1").unwrap().is_none());
    }

    #[test]
    fn test_set_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut cache = MetadataCache::new(temp.path().join("cache.json"));
        let date = CacheDate {
            year: 2016,
            month: 8,
            day: 17,
            timestamp: 1_471_421_346,
        };
        cache.set("Event", "1.1", date).unwrap();
        assert_eq!(cache.get("Event", "1.1").unwrap(), Some(date));
        assert_eq!(cache.get("Event", "1.2").unwrap(), None);
    }

    #[test]
    fn test_persist_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        let date = CacheDate {
            year: 2016,
            month: 8,
            day: 17,
            timestamp: 1_471_421_346,
        };

        let mut cache = MetadataCache::new(&path);
        cache.set("Event", "1.1", date).unwrap();
        cache.persist().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"Event-1.1\""));
        assert!(raw.contains("\"update_at\""));

        let mut reloaded = MetadataCache::new(&path);
        assert_eq!(reloaded.get("Event", "1.1").unwrap(), Some(date));
    }

    #[test]
    fn test_persist_skipped_when_clean() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        let mut cache = MetadataCache::new(&path);
        cache.get("Event", "1.1").unwrap();
        cache.persist().unwrap();
        assert!(!path.exists(), "clean cache must not be written");
    }

    #[test]
    fn test_today_stamps_current_date_and_time() {
        let now = Utc::now();
        let today = CacheDate::today();
        assert_eq!(today.to_date(), Some(now.date_naive()));
        assert!(today.timestamp >= now.timestamp());
    }

    #[test]
    fn test_legacy_entry_without_timestamp_loads_as_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"Event-1.1":{"year":2016,"month":8,"day":17},"update_at":1471421346}"#,
        )
        .unwrap();

        let mut cache = MetadataCache::new(&path);
        let entry = cache.get("Event", "1.1").unwrap().unwrap();
        assert_eq!(entry.to_date(), NaiveDate::from_ymd_opt(2016, 8, 17));
        assert_eq!(entry.timestamp, 0);
    }

    #[test]
    fn test_set_same_value_stays_clean() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        let date = CacheDate {
            year: 2016,
            month: 8,
            day: 17,
            timestamp: 1_471_421_346,
        };

        let mut cache = MetadataCache::new(&path);
        cache.set("Event", "1.1", date).unwrap();
        cache.persist().unwrap();

        let mut cache = MetadataCache::new(&path);
        cache.set("Event", "1.1", date).unwrap();
        assert!(!cache.is_dirty());
    }
}
