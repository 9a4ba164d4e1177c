// Indexer module
// Embeds the character corpus and upserts it into the vector index


use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus::{CharacterRecord, normalize_id};
use crate::embeddings::Encoder;
use crate::index::{DEFAULT_METADATA_MAX_BYTES, IndexEntry, VectorIndex};
use crate::{Result, SearchError};

const DEFAULT_BATCH_SIZE: usize = 32;

/// Statistics about one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub records_seen: usize,
    pub upserted: usize,
    /// Records with no biography sections, embedded from Name and Overview
    pub without_biography: usize,
    /// Ids shared by more than one record; the last record wins
    pub duplicate_ids: usize,
}

/// Upsert key for the `position`-th record (0-based): the ASCII form of its
/// name, or `character-<n>` when nothing ASCII remains
#[inline]
pub fn record_id(record: &CharacterRecord, position: usize) -> String {
    let id = normalize_id(record.name());
    if id.is_empty() {
        format!("character-{}", position + 1)
    } else {
        id
    }
}

/// Loads character records into a [`VectorIndex`] in embedding batches
pub struct Indexer {
    encoder: Arc<dyn Encoder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    metadata_max_bytes: usize,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(encoder: Arc<dyn Encoder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            encoder,
            index,
            batch_size: DEFAULT_BATCH_SIZE,
            metadata_max_bytes: DEFAULT_METADATA_MAX_BYTES,
            show_progress: false,
        }
    }

    #[inline]
    pub fn from_config(
        encoder: Arc<dyn Encoder>,
        index: Arc<dyn VectorIndex>,
        config: &Config,
    ) -> Self {
        Self::new(encoder, index)
            .with_batch_size(config.ollama.batch_size as usize)
            .with_metadata_max_bytes(config.index.metadata_max_bytes)
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_metadata_max_bytes(mut self, max_bytes: usize) -> Self {
        self.metadata_max_bytes = max_bytes;
        self
    }

    #[inline]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if self.show_progress && console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Indexing {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(len as u64).with_style(style)
        } else {
            ProgressBar::hidden()
        }
    }

    /// Embed and upsert `records`.
    ///
    /// Every record is written, including ones with no biography sections.
    /// When several records share an id only the last one is written.
    #[inline]
    pub async fn index_records(&self, records: Vec<CharacterRecord>) -> Result<IndexingStats> {
        let mut stats = IndexingStats {
            records_seen: records.len(),
            ..IndexingStats::default()
        };

        if self.encoder.dimension() != self.index.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.encoder.dimension(),
            });
        }

        // Resolve ids up front so the last duplicate is the one kept
        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut keyed: Vec<(String, CharacterRecord)> = Vec::with_capacity(records.len());

        for (position, record) in records.into_iter().enumerate() {
            if !record.has_biography() {
                warn!(
                    "'{}' has no biography sections, embedding name and overview",
                    record.name()
                );
                stats.without_biography += 1;
            }

            let id = record_id(&record, position);
            match by_id.get(&id) {
                Some(&slot) => {
                    debug!("Duplicate id '{}', replacing earlier record", id);
                    stats.duplicate_ids += 1;
                    keyed[slot].1 = record;
                }
                None => {
                    by_id.insert(id.clone(), keyed.len());
                    keyed.push((id, record));
                }
            }
        }

        info!(
            "Indexing {} records into '{}' ({} without biography, {} duplicate ids)",
            keyed.len(),
            self.index.name(),
            stats.without_biography,
            stats.duplicate_ids
        );

        let bar = self.progress_bar(keyed.len());

        for batch in keyed.chunks(self.batch_size) {
            let records: Vec<CharacterRecord> =
                batch.iter().map(|(_, record)| record.clone()).collect();
            let encoder = Arc::clone(&self.encoder);

            let vectors = tokio::task::spawn_blocking(move || encoder.embed_documents(&records))
                .await
                .map_err(|e| SearchError::Embedding(format!("embedding task failed: {}", e)))??;

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|((id, record), vector)| {
                    IndexEntry::new(id.clone(), vector, record, self.metadata_max_bytes)
                })
                .collect();

            stats.upserted += self.index.upsert(entries).await?;

            if let Some((id, _)) = batch.last() {
                bar.set_message(id.clone());
            }
            bar.inc(batch.len() as u64);
        }

        bar.finish_and_clear();
        info!(
            "Indexed {} of {} records",
            stats.upserted, stats.records_seen
        );
        Ok(stats)
    }
}
