// Search-and-answer pipeline
// Wires the encoder, the index and the chat model behind one query call


use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, SearchConfig};
use crate::embeddings::{Encoder, OllamaClient};
use crate::generation::{AnswerBundle, AnswerGenerator, ChatModel, OllamaChatClient};
use crate::index::{LanceIndex, VectorIndex};
use crate::search::{Retriever, SearchResult, TraitFilterMode};
use crate::{Result, SearchError};

/// Per-query knobs; defaults come from the `[search]` config section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub trait_filter: Option<String>,
    pub generate_answer: bool,
    /// Overrides the configured filter placement for this query
    pub filter_mode: Option<TraitFilterMode>,
}

impl Default for QueryOptions {
    #[inline]
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl QueryOptions {
    #[inline]
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            top_k: config.top_k,
            trait_filter: None,
            generate_answer: true,
            filter_mode: None,
        }
    }
}

/// What happened to the narrative answer for a query
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    Generated(AnswerBundle),
    /// The caller asked for results only
    Skipped,
    /// Generation failed; the results are still usable
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub answer: AnswerOutcome,
}

/// Long-lived handles for answering queries. Build once, share freely.
#[derive(Clone)]
pub struct SearchPipeline {
    retriever: Retriever,
    generator: AnswerGenerator,
    index: Arc<dyn VectorIndex>,
    defaults: QueryOptions,
    generation_timeout: Duration,
}

impl SearchPipeline {
    /// Assemble a pipeline from already constructed services. The encoder
    /// and the index must agree on the vector dimension.
    #[inline]
    pub fn new(
        encoder: Arc<dyn Encoder>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        config: &SearchConfig,
    ) -> Result<Self> {
        if encoder.dimension() != index.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: index.dimension(),
                actual: encoder.dimension(),
            });
        }

        Ok(Self {
            retriever: Retriever::from_config(encoder, Arc::clone(&index), config),
            generator: AnswerGenerator::from_config(chat, config),
            index,
            defaults: QueryOptions::from_config(config),
            generation_timeout: config.generation_timeout(),
        })
    }

    #[inline]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Build the Ollama clients and open the LanceDB index described by
    /// `config`. Fails when the embedding model is unreachable, the index
    /// is missing or its dimension disagrees with the configuration. An
    /// unavailable generation model only degrades answers.
    #[inline]
    pub async fn connect(config: &Config) -> Result<Self> {
        let encoder = OllamaClient::new(&config.ollama)?
            .with_time_budget(config.search.retrieval_timeout());
        encoder
            .health_check()
            .map_err(|e| {
                SearchError::Config(format!("Embedding service unavailable: {e:#}"))
            })?;

        let chat = OllamaChatClient::new(&config.ollama)?
            .with_time_budget(config.search.generation_timeout());
        if let Err(e) = chat.health_check() {
            warn!("Answers will be unavailable: {:#}", e);
        }

        let index = LanceIndex::open(config).await?;

        info!(
            "Search pipeline ready (index '{}', embedding model {}, generation model {})",
            index.name(),
            encoder.model(),
            chat.model()
        );

        Self::new(
            Arc::new(encoder),
            Arc::new(index),
            Arc::new(chat),
            &config.search,
        )
    }

    /// Options matching the configured defaults
    #[inline]
    pub fn default_options(&self) -> QueryOptions {
        self.defaults.clone()
    }

    #[inline]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Retrieve, filter and answer one query.
    ///
    /// Retrieval failures are returned as errors. Generation failures,
    /// including running past the generation timeout, are reported through
    /// [`AnswerOutcome::Unavailable`] next to the results.
    #[inline]
    pub async fn query(&self, query: &str, options: &QueryOptions) -> Result<SearchOutcome> {
        let retriever = match options.filter_mode {
            Some(mode) => self.retriever.clone().with_mode(mode),
            None => self.retriever.clone(),
        };

        let results = retriever
            .retrieve(query, options.top_k, options.trait_filter.as_deref())
            .await?;

        if !options.generate_answer {
            return Ok(SearchOutcome {
                results,
                answer: AnswerOutcome::Skipped,
            });
        }

        let generator = self.generator.clone();
        let question = query.to_string();
        let sources = results.clone();

        let task =
            tokio::task::spawn_blocking(move || generator.generate_answer(&question, &sources));
        let generated = match tokio::time::timeout(self.generation_timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| SearchError::Generation(format!("generation task failed: {}", e)))
                .and_then(|answer| answer),
            Err(_) => Err(SearchError::Generation(format!(
                "timed out after {:?}",
                self.generation_timeout
            ))),
        };

        let answer = match generated {
            Ok(bundle) => AnswerOutcome::Generated(bundle),
            Err(e) => {
                warn!("Falling back to raw results: {}", e);
                AnswerOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        Ok(SearchOutcome { results, answer })
    }
}
