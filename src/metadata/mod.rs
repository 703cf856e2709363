//! Persisted metadata: entities, batches, the metadata store seam, and the
//! cross-run entity-version date cache.

mod batch;
mod cache;
mod entity;
mod store;

pub use batch::{Batch, BatchFile};
pub use cache::{CacheDate, MetadataCache};
pub use entity::{Entity, Field};
pub use store::{JsonMetadataStore, MetadataStore};
