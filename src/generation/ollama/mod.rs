
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::SearchError;
use crate::config::OllamaConfig;
use crate::embeddings::ollama::{ErrorResponse, fetch_models, model_matches};
use crate::generation::ChatModel;
use crate::http::{DEFAULT_RETRY_ATTEMPTS, build_budgeted_agent, request_with_retry};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Non-streaming client for Ollama's `/api/chat`
#[derive(Debug, Clone)]
pub struct OllamaChatClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    timeout: Duration,
    time_budget: Option<Duration>,
    retry_attempts: u32,
    backoff_base: Duration,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

impl OllamaChatClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.generation_model.clone(),
            agent: build_budgeted_agent(config.request_timeout(), None),
            timeout: config.request_timeout(),
            time_budget: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = build_budgeted_agent(self.timeout, self.time_budget);
        self
    }

    /// Bound each completion, retries and backoff included, to `budget`
    #[inline]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self.agent = build_budgeted_agent(self.timeout, self.time_budget);
        self
    }

    fn deadline(&self) -> Option<Instant> {
        self.time_budget.map(|budget| Instant::now() + budget)
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[inline]
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Verify the server is reachable and the generation model is installed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let models = fetch_models(
            &self.agent,
            &self.base_url,
            self.retry_attempts,
            self.backoff_base,
            self.deadline(),
        )
        .context("Failed to list models")?;

        if models.iter().any(|m| model_matches(&m.name, &self.model)) {
            info!("Generation model {} is available", self.model);
            Ok(())
        } else {
            warn!("Generation model {} not found", self.model);
            Err(anyhow::anyhow!(
                "Generation model '{}' is not available. Run 'ollama pull {}'",
                self.model,
                self.model
            ))
        }
    }

    /// Send one system + user exchange and return the assistant's reply
    #[inline]
    pub fn chat(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                num_predict: max_tokens,
            },
        };

        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        debug!(
            "Requesting completion from {} (prompt length: {}, max tokens: {})",
            self.model,
            prompt.len(),
            max_tokens
        );

        let response_text = request_with_retry(
            url.as_str(),
            self.retry_attempts,
            self.backoff_base,
            self.deadline(),
            || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            },
        )
        .context("Chat request failed")?;

        if let Ok(error) = serde_json::from_str::<ErrorResponse>(&response_text) {
            return Err(anyhow::anyhow!("Ollama error: {}", error.error));
        }

        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        let content = response.message.content.trim();
        if content.is_empty() {
            return Err(anyhow::anyhow!("Model returned an empty completion"));
        }

        debug!("Received completion of {} chars", content.len());
        Ok(content.to_string())
    }
}

impl ChatModel for OllamaChatClient {
    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> crate::Result<String> {
        self.chat(system, prompt, max_tokens)
            .map_err(|e| SearchError::Generation(format!("{e:#}")))
    }
}
