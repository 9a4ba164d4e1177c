
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{IndexEntry, IndexMatch, VectorIndex};
use crate::config::Config;
use crate::corpus::CharacterRecord;
use crate::{Result, SearchError};

/// Character vectors in a LanceDB table, one table per index name
pub struct LanceIndex {
    table: Table,
    name: String,
    dimension: usize,
}

/// Failures here happen before any query is served, so they are configuration
/// errors rather than index errors
async fn connect(db_path: &Path) -> Result<Connection> {
    std::fs::create_dir_all(db_path).map_err(|e| {
        SearchError::Config(format!(
            "Failed to create vector database directory {}: {}",
            db_path.display(),
            e
        ))
    })?;

    let uri = db_path.to_string_lossy();
    debug!("Connecting to LanceDB at {}", uri);

    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| SearchError::Config(format!("Failed to connect to LanceDB: {}", e)))
}

async fn table_exists(connection: &Connection, name: &str) -> Result<bool> {
    let table_names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| SearchError::Config(format!("Failed to list tables: {}", e)))?;
    Ok(table_names.iter().any(|t| t == name))
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("name", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("indexed_at", DataType::Utf8, false),
    ]))
}

/// Detect vector dimension from an existing table schema
async fn detect_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| SearchError::Index(format!("Failed to get table schema: {}", e)))?;

    for field in schema.fields() {
        if field.name() == "vector" {
            if let DataType::FixedSizeList(_, size) = field.data_type() {
                return Ok(*size as usize);
            }
        }
    }

    Err(SearchError::Index(
        "Could not find vector column or determine dimension".to_string(),
    ))
}

impl LanceIndex {
    /// Open the configured index. A missing index or a dimension different
    /// from the configured embedding dimension is a configuration error.
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_at(
            &config.vector_database_path(),
            &config.index.name,
            config.ollama.embedding_dimension as usize,
        )
        .await
    }

    #[inline]
    pub async fn open_at(db_path: &Path, name: &str, expected_dimension: usize) -> Result<Self> {
        let connection = connect(db_path).await?;

        if !table_exists(&connection, name).await? {
            return Err(SearchError::Config(format!(
                "Index '{}' not found in {}. Run 'twd-search index <corpus-dir>' first.",
                name,
                db_path.display()
            )));
        }

        let table = connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| SearchError::Config(format!("Failed to open index '{}': {}", name, e)))?;

        let dimension = detect_dimension(&table).await?;
        if dimension != expected_dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: expected_dimension,
            });
        }

        info!("Opened index '{}' ({} dimensions)", name, dimension);
        Ok(Self {
            table,
            name: name.to_string(),
            dimension,
        })
    }

    /// Open the configured index, creating it when it does not exist yet
    #[inline]
    pub async fn open_or_create(config: &Config) -> Result<Self> {
        Self::open_or_create_at(
            &config.vector_database_path(),
            &config.index.name,
            config.ollama.embedding_dimension as usize,
        )
        .await
    }

    #[inline]
    pub async fn open_or_create_at(db_path: &Path, name: &str, dimension: usize) -> Result<Self> {
        let connection = connect(db_path).await?;
        if table_exists(&connection, name).await? {
            return Self::open_at(db_path, name, dimension).await;
        }
        Self::create_table(&connection, name, dimension).await
    }

    /// Drop any existing index of this name and create an empty one
    #[inline]
    pub async fn recreate_at(db_path: &Path, name: &str, dimension: usize) -> Result<Self> {
        let connection = connect(db_path).await?;

        if table_exists(&connection, name).await? {
            info!("Dropping existing index '{}'", name);
            connection
                .drop_table(name)
                .await
                .map_err(|e| SearchError::Index(format!("Failed to drop index: {}", e)))?;
        }

        Self::create_table(&connection, name, dimension).await
    }

    /// Create an empty index compared by cosine distance
    async fn create_table(connection: &Connection, name: &str, dimension: usize) -> Result<Self> {
        info!(
            "Creating index '{}' with {} dimensions (cosine metric)",
            name, dimension
        );

        let table = connection
            .create_empty_table(name, create_schema(dimension))
            .execute()
            .await
            .map_err(|e| SearchError::Index(format!("Failed to create index '{}': {}", name, e)))?;

        Ok(Self {
            table,
            name: name.to_string(),
            dimension,
        })
    }

    /// Create a RecordBatch from index entries
    fn create_record_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch> {
        let len = entries.len();
        let indexed_at = Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut names = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.dimension,
                    actual: entry.vector.len(),
                });
            }

            ids.push(entry.id.as_str());
            names.push(entry.metadata.name());
            metadata.push(serde_json::to_string(&entry.metadata).map_err(|e| {
                SearchError::Index(format!("Failed to serialize metadata for {}: {}", entry.id, e))
            })?);
            flat_values.extend_from_slice(&entry.vector);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| SearchError::Index(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(StringArray::from(vec![indexed_at.as_str(); len])),
        ];

        RecordBatch::try_new(create_schema(self.dimension), arrays)
            .map_err(|e| SearchError::Index(format!("Failed to create record batch: {}", e)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<IndexMatch>> {
        let ids = string_column(batch, "id")?;
        let metadata = string_column(batch, "metadata")?;

        // Extract distance scores if available
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut matches = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let record: CharacterRecord = match serde_json::from_str(metadata.value(row)) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Unreadable metadata for {}: {}", ids.value(row), e);
                    CharacterRecord::new()
                }
            };

            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Cosine distance is 1 - cosine similarity
            matches.push(IndexMatch {
                id: ids.value(row).to_string(),
                score: 1.0 - distance,
                metadata: record,
            });
        }

        Ok(matches)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| SearchError::Index(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SearchError::Index(format!("Invalid {} column type", name)))
}

/// Keep the last entry for every id, in order of last appearance
fn dedupe_last_wins(entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
    let mut last_seen: HashMap<String, usize> = HashMap::new();
    for (position, entry) in entries.iter().enumerate() {
        last_seen.insert(entry.id.clone(), position);
    }

    entries
        .into_iter()
        .enumerate()
        .filter(|(position, entry)| last_seen.get(&entry.id) == Some(position))
        .map(|(_, entry)| entry)
        .collect()
}

#[async_trait]
impl VectorIndex for LanceIndex {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            debug!("No entries to upsert");
            return Ok(0);
        }

        let submitted = entries.len();
        let entries = dedupe_last_wins(entries);
        if entries.len() != submitted {
            warn!(
                "Batch contained {} duplicate ids, keeping the last of each",
                submitted - entries.len()
            );
        }

        let record_batch = self.create_record_batch(&entries)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = self.table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| SearchError::Index(format!("Failed to upsert entries: {}", e)))?;

        debug!("Upserted {} entries into '{}'", entries.len(), self.name);
        Ok(entries.len())
    }

    #[inline]
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        debug!("Querying '{}' for {} nearest neighbors", self.name, top_k);

        if vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut results = self
            .table
            .vector_search(vector)
            .map_err(|e| SearchError::Index(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| SearchError::Index(format!("Failed to execute search: {}", e)))?;

        let mut matches = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| SearchError::Index(format!("Failed to read result stream: {}", e)))?
        {
            matches.extend(Self::parse_search_batch(&batch)?);
        }

        // Stable: equal scores keep the order the index returned them in
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);

        debug!("Index returned {} matches", matches.len());
        Ok(matches)
    }

    #[inline]
    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| SearchError::Index(format!("Failed to count rows: {}", e)))
    }
}
