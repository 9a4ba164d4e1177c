// Embeddings module
// Text encoders for the document (index) side and the query side

pub mod ollama;

pub use ollama::OllamaClient;

use crate::corpus::CharacterRecord;
use crate::{Result, SearchError};

/// Maps text to fixed-length vectors.
///
/// The document path and the query path are distinct on purpose: a document
/// is embedded from [`CharacterRecord::embedding_text`], a query is embedded
/// as typed. Both must run on the same model and version as the index was
/// built with.
pub trait Encoder: Send + Sync {
    /// Dimension every produced vector must have
    fn dimension(&self) -> usize;

    /// Raw encoding call, no dimension check
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Raw batch encoding; implementations with a batch API should override
    #[inline]
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    /// Embed a user question
    #[inline]
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        ensure_dimension(self.dimension(), self.encode(query)?)
    }

    /// Embed a character record through its document field concatenation
    #[inline]
    fn embed_document(&self, record: &CharacterRecord) -> Result<Vec<f32>> {
        ensure_dimension(self.dimension(), self.encode(&record.embedding_text())?)
    }

    #[inline]
    fn embed_documents(&self, records: &[CharacterRecord]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = records.iter().map(CharacterRecord::embedding_text).collect();
        let vectors = self.encode_batch(&texts)?;

        if vectors.len() != records.len() {
            return Err(SearchError::Embedding(format!(
                "Encoder returned {} vectors for {} documents",
                vectors.len(),
                records.len()
            )));
        }

        vectors
            .into_iter()
            .map(|vector| ensure_dimension(self.dimension(), vector))
            .collect()
    }
}

/// Reject vectors whose length differs from the configured dimension. A
/// mismatch means the model and the index disagree, which no retry fixes.
#[inline]
pub fn ensure_dimension(expected: usize, vector: Vec<f32>) -> Result<Vec<f32>> {
    if vector.len() == expected {
        Ok(vector)
    } else {
        Err(SearchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}
