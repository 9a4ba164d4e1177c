
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::generation::ChatModel;
use crate::search::SearchResult;
use crate::{Result, SearchError};

/// Answer returned without calling the model when retrieval found nothing
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any information about that in The Walking Dead character database.";
pub const UNKNOWN_NAME: &str = "Unknown";
pub const NO_OVERVIEW: &str = "No overview available.";
pub const TRUNCATION_SUFFIX: &str = "...";

pub const DEFAULT_MAX_SOURCES: usize = 3;
pub const DEFAULT_SNIPPET_CHARS: usize = 200;
pub const DEFAULT_MAX_ANSWER_TOKENS: u32 = 300;

const SYSTEM_PROMPT: &str = "You are an expert on The Walking Dead TV series. \
Answer questions about its characters using only the numbered sources provided. \
Cite every claim with the bracketed number of its source, such as [1] or [2]. \
If the sources do not answer the question, say so.";

/// A source the answer may cite as `[index]`
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSource {
    /// 1-based citation number
    pub index: usize,
    pub id: String,
    pub name: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerBundle {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
}

impl AnswerBundle {
    #[inline]
    pub fn no_information() -> Self {
        Self {
            answer: NO_INFORMATION_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

/// First `max_chars` characters of `text` plus [`TRUNCATION_SUFFIX`] when cut
#[inline]
pub fn snippet(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        head + TRUNCATION_SUFFIX
    } else {
        head
    }
}

/// Builds grounded, cited answers from retrieved characters
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    max_sources: usize,
    snippet_chars: usize,
    max_tokens: u32,
}

impl AnswerGenerator {
    #[inline]
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            max_sources: DEFAULT_MAX_SOURCES,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            max_tokens: DEFAULT_MAX_ANSWER_TOKENS,
        }
    }

    #[inline]
    pub fn from_config(model: Arc<dyn ChatModel>, config: &SearchConfig) -> Self {
        Self {
            model,
            max_sources: config.max_sources.max(1),
            snippet_chars: config.snippet_chars,
            max_tokens: config.max_answer_tokens,
        }
    }

    /// Numbered sources for the leading results, in input order
    #[inline]
    pub fn sources(&self, results: &[SearchResult]) -> Vec<AnswerSource> {
        results
            .iter()
            .take(self.max_sources)
            .enumerate()
            .map(|(position, result)| {
                let name = result.record.name();
                let overview = result.record.overview().trim();

                AnswerSource {
                    index: position + 1,
                    id: result.id.clone(),
                    name: if name.is_empty() { UNKNOWN_NAME } else { name }.to_string(),
                    snippet: if overview.is_empty() {
                        NO_OVERVIEW.to_string()
                    } else {
                        snippet(overview, self.snippet_chars)
                    },
                    score: result.score,
                }
            })
            .collect()
    }

    /// The user prompt: the question, the numbered sources and the
    /// citation instruction
    #[inline]
    pub fn build_prompt(query: &str, sources: &[AnswerSource]) -> String {
        let mut prompt = format!("Question: {}\n\nSources:\n", query.trim());
        for source in sources {
            let _ = writeln!(prompt, "[{}] {}: {}", source.index, source.name, source.snippet);
        }
        prompt.push_str(
            "\nAnswer the question concisely using only these sources. \
             Cite each source you use with its bracketed number, for example [1].",
        );
        prompt
    }

    /// Answer `query` from the first results.
    ///
    /// With no results the fixed [`NO_INFORMATION_ANSWER`] is returned and
    /// the model is not called. Model failures surface as
    /// [`SearchError::Generation`].
    #[inline]
    pub fn generate_answer(&self, query: &str, results: &[SearchResult]) -> Result<AnswerBundle> {
        if results.is_empty() {
            debug!("No results for '{}', skipping generation", query);
            return Ok(AnswerBundle::no_information());
        }

        let sources = self.sources(results);
        let prompt = Self::build_prompt(query, &sources);

        debug!(
            "Generating answer with {} from {} sources",
            self.model.model(),
            sources.len()
        );

        let answer = self
            .model
            .complete(SYSTEM_PROMPT, &prompt, self.max_tokens)?
            .trim()
            .to_string();

        if answer.is_empty() {
            return Err(SearchError::Generation(
                "model returned an empty answer".to_string(),
            ));
        }

        info!(
            "Generated answer of {} chars citing up to {} sources",
            answer.len(),
            sources.len()
        );
        Ok(AnswerBundle { answer, sources })
    }
}
