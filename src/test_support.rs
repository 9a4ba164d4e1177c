// In-memory doubles for the encoder, index and chat seams

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::corpus::CharacterRecord;
use crate::embeddings::Encoder;
use crate::generation::ChatModel;
use crate::index::{DEFAULT_METADATA_MAX_BYTES, IndexEntry, IndexMatch, VectorIndex};
use crate::{Result, SearchError};

/// Returns the same vector for every text
pub struct StaticEncoder {
    pub vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl StaticEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Encoder for StaticEncoder {
    fn dimension(&self) -> usize {
        self.vector.len()
    }

    fn encode(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Brute-force cosine index that records the `top_k` of every query
pub struct MemoryIndex {
    dimension: usize,
    entries: Mutex<Vec<IndexEntry>>,
    pub requested: Mutex<Vec<usize>>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Mutex::new(Vec::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_characters(dimension: usize, characters: &[(&str, &str, Vec<f32>)]) -> Self {
        let index = Self::new(dimension);
        {
            let mut entries = index.entries.lock().expect("index lock");
            for (name, overview, vector) in characters {
                let record = CharacterRecord::from_fields([("Name", *name), ("Overview[]", *overview)]);
                entries.push(IndexEntry::new(
                    crate::corpus::normalize_id(name),
                    vector.clone(),
                    &record,
                    DEFAULT_METADATA_MAX_BYTES,
                ));
            }
        }
        index
    }

    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries.lock().expect("index lock").clone()
    }

    pub fn requested(&self) -> Vec<usize> {
        self.requested.lock().expect("index lock").clone()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, batch: Vec<IndexEntry>) -> Result<usize> {
        let mut entries = self.entries.lock().expect("index lock");
        let written = batch.len();
        for entry in batch {
            entries.retain(|e| e.id != entry.id);
            entries.push(entry);
        }
        Ok(written)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        self.requested.lock().expect("index lock").push(top_k);
        let entries = self.entries.lock().expect("index lock");
        let mut matches: Vec<IndexMatch> = entries
            .iter()
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.lock().expect("index lock").len())
    }
}

/// Index that is always unreachable
pub struct FailingIndex {
    pub dimension: usize,
}

#[async_trait]
impl VectorIndex for FailingIndex {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, _entries: Vec<IndexEntry>) -> Result<usize> {
        Err(SearchError::Index("connection refused".to_string()))
    }

    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>> {
        Err(SearchError::Index("connection refused".to_string()))
    }

    async fn count(&self) -> Result<usize> {
        Err(SearchError::Index("connection refused".to_string()))
    }
}

/// Index whose queries never finish in time
pub struct StalledIndex {
    pub dimension: usize,
}

#[async_trait]
impl VectorIndex for StalledIndex {
    fn name(&self) -> &str {
        "stalled"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        Ok(entries.len())
    }

    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Chat model answering with a fixed reply, or failing when it has none
pub struct ScriptedChat {
    reply: Option<String>,
    delay: Duration,
    pub prompts: Mutex<Vec<(String, String, u32)>>,
}

impl ScriptedChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies only after blocking for `delay`
    pub fn stalling(reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(reply)
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("chat lock").len()
    }

    pub fn last_prompt(&self) -> Option<(String, String, u32)> {
        self.prompts.lock().expect("chat lock").last().cloned()
    }
}

impl ChatModel for ScriptedChat {
    fn model(&self) -> &str {
        "scripted"
    }

    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        self.prompts.lock().expect("chat lock").push((
            system.to_string(),
            prompt.to_string(),
            max_tokens,
        ));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.reply
            .clone()
            .ok_or_else(|| SearchError::Generation("quota exceeded".to_string()))
    }
}
