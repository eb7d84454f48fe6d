//! OpenAI-compatible chat-completions worker
//!
//! Every call is stateless: the engine builds the whole context into the prompt,
//! so no conversation history is kept here. Rate limits and server errors are
//! retried with backoff; repeated hard failures open a per-worker circuit breaker.

use async_trait::async_trait;
use ensemble_core::{Message, ModelConfig, Result, WorkerError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalPolicy;
use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::promise::CompletionPromise;
use crate::roster::Specialist;
use crate::types::{ChatMessage, ChatRequest, ChatResponse};
use crate::worker::{Worker, WorkerResult};

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 300;

/// Worker backed by a chat-completions endpoint
pub struct ChatWorker {
    name: String,
    instructions: String,
    model: String,
    max_tokens: usize,
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
    breaker: CircuitBreaker,
    initial_backoff: Duration,
}

impl ChatWorker {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        api_key: impl Into<String>,
        models: &ModelConfig,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: models.default.clone(),
            max_tokens: models.max_tokens,
            endpoint: format!("{}/chat/completions", models.api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            breaker: CircuitBreaker::default(),
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
        }
    }

    /// Worker whose key comes from the environment variable named in `models`
    pub fn from_env(
        name: impl Into<String>,
        instructions: impl Into<String>,
        models: &ModelConfig,
    ) -> Result<Self> {
        let api_key = auth::get_api_key(&models.api_key_env)?;
        Ok(Self::new(name, instructions, api_key, models))
    }

    /// Worker for a roster specialist, with the approval rules in its instructions
    pub fn for_specialist(
        specialist: &Specialist,
        models: &ModelConfig,
        policy: &ApprovalPolicy,
    ) -> Result<Self> {
        let instructions = format!(
            "{}\n\n{}\n\nWhen the whole task is done, end your answer with {}.",
            specialist.instructions,
            policy.instructions(),
            CompletionPromise::marker()
        );
        Self::from_env(specialist.key, instructions, models)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage::system(self.instructions.clone()),
                ChatMessage::user(prompt),
            ],
        }
    }

    async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> WorkerResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> WorkerResult<String> {
        if !self.breaker.can_execute() {
            return Err(WorkerError::Unavailable(format!(
                "circuit breaker open for {}, retry in {}s",
                self.name,
                self.breaker.time_until_retry().as_secs()
            )));
        }

        let request = self.request(prompt);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;
        let max_backoff = Duration::from_secs(MAX_BACKOFF_SECS).max(self.initial_backoff);

        loop {
            tracing::debug!("{}: sending chat request (attempt {})", self.name, retries + 1);

            let send = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
                sent = send => sent.map_err(|e| {
                    self.breaker.record_failure();
                    WorkerError::Unavailable(format!("request failed: {}", e))
                })?,
            };

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    self.breaker.record_failure();
                    return Err(WorkerError::Unavailable(format!(
                        "rate limit exceeded after {} retries",
                        MAX_RETRIES
                    )));
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "{}: rate limited (429), waiting {}s before retry {}/{}",
                    self.name,
                    wait.as_secs(),
                    retries,
                    MAX_RETRIES
                );
                Self::wait_or_cancel(wait, cancel).await?;
                backoff = (backoff * 2).min(max_backoff);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        "{}: server error ({}), waiting {}s before retry {}/{}",
                        self.name,
                        status,
                        backoff.as_secs(),
                        retries,
                        MAX_RETRIES
                    );
                    Self::wait_or_cancel(backoff, cancel).await?;
                    backoff = (backoff * 2).min(max_backoff);
                    continue;
                }

                self.breaker.record_failure();
                tracing::error!(
                    "{}: API error {} (breaker failures: {})",
                    self.name,
                    status,
                    self.breaker.failure_count()
                );
                return Err(WorkerError::Unavailable(format!(
                    "API error {}: {}",
                    status, error_text
                )));
            }

            let body: ChatResponse = response
                .json()
                .await
                .map_err(|e| WorkerError::InvalidResponse(format!("unparseable body: {}", e)))?;
            let text = body
                .first_text()
                .ok_or_else(|| WorkerError::InvalidResponse("no choices in response".to_string()))?
                .to_string();

            self.breaker.record_success();
            match &body.usage {
                Some(usage) => tracing::info!(
                    "{}: response complete ({} chars, {} prompt tokens, {} completion tokens)",
                    self.name,
                    text.len(),
                    usage.prompt_tokens,
                    usage.completion_tokens
                ),
                None => tracing::info!("{}: response complete ({} chars)", self.name, text.len()),
            }
            return Ok(text);
        }
    }
}

impl std::fmt::Debug for ChatWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatWorker")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("breaker", &self.breaker.state())
            .finish()
    }
}

#[async_trait]
impl Worker for ChatWorker {
    async fn respond(&self, prompt: &str, cancel: &CancellationToken) -> WorkerResult<Message> {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        let text = self.complete(prompt, cancel).await?;
        Ok(Message::new(self.name.clone(), text))
    }
}
