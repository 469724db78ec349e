//! LLM chat-completion clients
//!
//! The `ChatClient` trait abstracts the transport so the analyzer doesn't
//! depend on how the model is reached: `HttpChatClient` for OpenAI-compatible
//! APIs, `ScriptedChatClient` for deterministic tests. Retry/backoff and the
//! process-wide rate governor live here because every caller needs them.

mod http;

pub use http::HttpChatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Errors from LLM operations.
///
/// Transient variants are retried by `RetryPolicy`; permanent ones fail the
/// current item immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("transient API error: {0}")]
    Transient(String),

    #[error("permanent API error: {0}")]
    Permanent(String),

    #[error("response parse error: {0}")]
    Parse(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout(_) | LlmError::Transient(_)
        )
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the API for a JSON object response
    pub json_mode: bool,
    /// Deterministic seed — fixed in tests so reruns reproduce
    pub seed: Option<u64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            seed: None,
        }
    }

    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::system(content));
        self
    }

    pub fn with_user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Token accounting for a chat call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// A chat-completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Client trait for chat completions.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Exponential backoff for transient LLM errors: 1 s doubling to a 30 s cap,
/// at most 5 attempts. Rate-limit responses wait at least their retry-after.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            cap,
            max_attempts,
        }
    }

    /// Run an operation, retrying transient errors with backoff.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut delay = self.initial;
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let wait = match &err {
                        LlmError::RateLimited { retry_after_s } => {
                            delay.max(Duration::from_secs(*retry_after_s)).min(self.cap)
                        }
                        _ => delay,
                    };
                    tracing::warn!(attempt, error = %err, "transient LLM error, backing off");
                    tokio::time::sleep(wait).await;
                    delay = delay.saturating_mul(2).min(self.cap);
                }
                other => return other,
            }
        }
    }
}

/// Process-wide leaky-bucket governor for LLM calls.
///
/// Every chat call acquires the governor before hitting the API, so the
/// `rate_limit_delay` spacing holds across all concurrent sessions.
pub struct RateGovernor {
    min_interval: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    /// An inert governor for tests.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until the next call slot is available, then claim it.
    pub async fn acquire(&self) {
        let wait = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let ready_at = slot.unwrap_or(now).max(now);
            *slot = Some(ready_at + self.min_interval);
            ready_at.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Scripted client for tests — pops queued responses, falls back to keyed
/// responses matched by substring of the last user message, then the default.
pub struct ScriptedChatClient {
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    keyed: Vec<(String, String)>,
    default: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            keyed: Vec::new(),
            default: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response (consumed in order).
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.queue.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    /// Queue an error (consumed in order).
    pub fn with_error(self, error: LlmError) -> Self {
        self.queue.lock().unwrap().push_back(Err(error));
        self
    }

    /// Respond with `content` whenever the user message contains `key`
    /// (checked after the queue is exhausted).
    pub fn with_keyed_response(mut self, key: impl Into<String>, content: impl Into<String>) -> Self {
        self.keyed.push((key.into(), content.into()));
        self
    }

    /// Fallback response once the queue is exhausted.
    pub fn with_default(mut self, content: impl Into<String>) -> Self {
        self.default = Some(content.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// User prompts seen so far, for asserting on prompt construction.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for ScriptedChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let user_prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(user_prompt.clone());

        if let Some(scripted) = self.queue.lock().unwrap().pop_front() {
            return scripted.map(|content| ChatResponse {
                usage: usage_estimate(&user_prompt, &content),
                content,
            });
        }
        for (key, content) in &self.keyed {
            if user_prompt.contains(key.as_str()) {
                return Ok(ChatResponse {
                    usage: usage_estimate(&user_prompt, content),
                    content: content.clone(),
                });
            }
        }
        match &self.default {
            Some(content) => Ok(ChatResponse {
                usage: usage_estimate(&user_prompt, content),
                content: content.clone(),
            }),
            None => Err(LlmError::Permanent(
                "scripted client has no response left".to_string(),
            )),
        }
    }
}

/// Rough 4-chars-per-token estimate for mock usage accounting.
fn usage_estimate(prompt: &str, completion: &str) -> TokenUsage {
    TokenUsage {
        prompt_tokens: (prompt.len() / 4) as u64,
        completion_tokens: (completion.len() / 4) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_client_pops_queue_then_default() {
        let client = ScriptedChatClient::new()
            .with_response("first")
            .with_default("fallback");
        let req = ChatRequest::new("test-model").with_user("hello");

        assert_eq!(client.chat(&req).await.unwrap().content, "first");
        assert_eq!(client.chat(&req).await.unwrap().content, "fallback");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_client_matches_keyed_responses() {
        let client = ScriptedChatClient::new()
            .with_keyed_response("payment", "about payment")
            .with_default("generic");
        let req = ChatRequest::new("m").with_user("is the payment clause safe?");
        assert_eq!(client.chat(&req).await.unwrap().content, "about payment");
        let req = ChatRequest::new("m").with_user("anything else");
        assert_eq!(client.chat(&req).await.unwrap().content, "generic");
    }

    #[tokio::test]
    async fn retry_policy_retries_transient_until_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 5);
        let calls = AtomicUsize::new(0);
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err(LlmError::Transient("blip".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn retry_policy_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(LlmError::Timeout(60)) }
            })
            .await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn retry_policy_fails_permanent_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(LlmError::Permanent("bad auth".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(LlmError::Permanent(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn governor_spaces_out_calls() {
        tokio::time::pause();
        let governor = RateGovernor::new(Duration::from_secs(2));
        let start = Instant::now();
        governor.acquire().await;
        governor.acquire().await;
        governor.acquire().await;
        // Third call must wait two full intervals (auto-advanced virtual time)
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn unlimited_governor_never_waits() {
        let governor = RateGovernor::unlimited();
        governor.acquire().await;
        governor.acquire().await;
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        });
        total.add(TokenUsage {
            prompt_tokens: 3,
            completion_tokens: 2,
        });
        assert_eq!(total.prompt_tokens, 13);
        assert_eq!(total.completion_tokens, 7);
    }
}
