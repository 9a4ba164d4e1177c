// Retrieval stage
// Query embedding, nearest-neighbor lookup and the optional trait filter

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::corpus::CharacterRecord;
use crate::embeddings::Encoder;
use crate::index::{IndexMatch, VectorIndex};
use crate::{Result, SearchError};

const DEFAULT_OVER_FETCH_FACTOR: usize = 4;
const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the trait filter runs relative to the top-K cut
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitFilterMode {
    /// Fetch exactly `top_k`, then filter. Matches outside the unfiltered
    /// top results never surface.
    #[default]
    AfterTopK,
    /// Fetch `top_k * over_fetch_factor` candidates, filter, then cut to `top_k`
    OverFetch,
}

impl fmt::Display for TraitFilterMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterTopK => write!(f, "after_top_k"),
            Self::OverFetch => write!(f, "over_fetch"),
        }
    }
}

/// One retrieved character
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub record: CharacterRecord,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

impl From<IndexMatch> for SearchResult {
    #[inline]
    fn from(m: IndexMatch) -> Self {
        Self {
            id: m.id,
            record: m.metadata,
            score: m.score,
        }
    }
}

/// Keep the results whose Overview contains `trait_text`, ignoring case.
/// A blank filter keeps everything.
#[inline]
pub fn apply_trait_filter(results: Vec<SearchResult>, trait_text: &str) -> Vec<SearchResult> {
    let needle = trait_text.trim().to_lowercase();
    if needle.is_empty() {
        return results;
    }

    results
        .into_iter()
        .filter(|result| result.record.overview().to_lowercase().contains(&needle))
        .collect()
}

/// Turns a question into ranked, optionally filtered, search results
#[derive(Clone)]
pub struct Retriever {
    encoder: Arc<dyn Encoder>,
    index: Arc<dyn VectorIndex>,
    mode: TraitFilterMode,
    over_fetch_factor: usize,
    timeout: Duration,
}

impl Retriever {
    #[inline]
    pub fn new(encoder: Arc<dyn Encoder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            encoder,
            index,
            mode: TraitFilterMode::default(),
            over_fetch_factor: DEFAULT_OVER_FETCH_FACTOR,
            timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    #[inline]
    pub fn from_config(
        encoder: Arc<dyn Encoder>,
        index: Arc<dyn VectorIndex>,
        config: &SearchConfig,
    ) -> Self {
        Self::new(encoder, index)
            .with_mode(config.trait_filter_mode)
            .with_over_fetch_factor(config.over_fetch_factor)
            .with_timeout(config.retrieval_timeout())
    }

    #[inline]
    pub fn with_mode(mut self, mode: TraitFilterMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn with_over_fetch_factor(mut self, factor: usize) -> Self {
        self.over_fetch_factor = factor.max(1);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn mode(&self) -> TraitFilterMode {
        self.mode
    }

    /// Number of neighbors to ask the index for
    #[inline]
    pub fn candidate_count(&self, top_k: usize, filtered: bool) -> usize {
        match (self.mode, filtered) {
            (TraitFilterMode::OverFetch, true) => top_k.saturating_mul(self.over_fetch_factor),
            _ => top_k,
        }
    }

    /// Embed `query`, fetch its nearest characters and apply `trait_filter`.
    ///
    /// Returns at most `top_k` results in descending score order. Failures
    /// to embed or to reach the index, timeouts included, are
    /// [`SearchError::Retrieval`]; a dimension mismatch stays fatal.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trait_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let trait_filter = trait_filter.map(str::trim).filter(|t| !t.is_empty());
        let candidates = self.candidate_count(top_k, trait_filter.is_some());

        debug!(
            "Retrieving {} candidates for query '{}' (filter: {:?}, mode: {})",
            candidates, query, trait_filter, self.mode
        );

        let matches = tokio::time::timeout(self.timeout, self.nearest(query, candidates))
            .await
            .map_err(|_| {
                warn!("Retrieval timed out after {:?}", self.timeout);
                SearchError::Retrieval(format!("timed out after {:?}", self.timeout))
            })??;

        let mut results: Vec<SearchResult> = matches.into_iter().map(SearchResult::from).collect();
        if let Some(trait_text) = trait_filter {
            let before = results.len();
            results = apply_trait_filter(results, trait_text);
            debug!(
                "Trait filter '{}' kept {} of {} results",
                trait_text,
                results.len(),
                before
            );
        }
        results.truncate(top_k);

        info!("Retrieved {} results for '{}'", results.len(), query);
        Ok(results)
    }

    async fn nearest(&self, query: &str, candidates: usize) -> Result<Vec<IndexMatch>> {
        let encoder = Arc::clone(&self.encoder);
        let text = query.to_string();

        let vector = tokio::task::spawn_blocking(move || encoder.embed_query(&text))
            .await
            .map_err(|e| SearchError::Retrieval(format!("embedding task failed: {}", e)))?
            .map_err(into_retrieval)?;

        self.index
            .query(&vector, candidates)
            .await
            .map_err(into_retrieval)
    }
}

fn into_retrieval(err: SearchError) -> SearchError {
    if err.is_fatal_config() {
        err
    } else {
        SearchError::Retrieval(err.to_string())
    }
}
