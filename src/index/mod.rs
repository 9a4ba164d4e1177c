// Vector index module
// Storage and nearest-neighbor lookup of character vectors

pub mod lancedb;
pub mod metadata;

pub use self::lancedb::LanceIndex;
pub use metadata::{DEFAULT_METADATA_MAX_BYTES, serialized_size, truncate_metadata};

use async_trait::async_trait;

use crate::Result;
use crate::corpus::CharacterRecord;

/// One vector stored in the index together with its display metadata
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// ASCII-only identifier, the upsert key
    pub id: String,
    pub vector: Vec<f32>,
    /// Metadata already cut down to the byte ceiling
    pub metadata: CharacterRecord,
}

impl IndexEntry {
    /// Build an entry whose metadata fits in `max_metadata_bytes`
    #[inline]
    pub fn new(
        id: String,
        vector: Vec<f32>,
        record: &CharacterRecord,
        max_metadata_bytes: usize,
    ) -> Self {
        Self {
            id,
            vector,
            metadata: truncate_metadata(record, max_metadata_bytes),
        }
    }
}

/// A nearest-neighbor hit as returned by the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    /// Cosine similarity, higher is closer
    pub score: f32,
    pub metadata: CharacterRecord,
}

/// Nearest-neighbor store queried by cosine similarity.
///
/// Handles are opened once and shared read-only across queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Dimension the index was created with
    fn dimension(&self) -> usize;

    /// Insert or replace entries keyed by id; last write wins. Returns the
    /// number of distinct ids written.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize>;

    /// The `top_k` closest entries, most similar first
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>>;

    async fn count(&self) -> Result<usize>;
}
