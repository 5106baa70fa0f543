//! Generative model abstraction and the phase runner.
//!
//! [`AiModel`] implementations make exactly one HTTP call per invocation
//! and classify failures; [`AiPhaseRunner`] owns everything around it:
//! the fingerprint cache, JSON repair, expected-key checks and the retry
//! loop.
//!
//! # Providers
//!
//! | Config value | Model | Endpoint |
//! |--------------|-------|----------|
//! | `"disabled"` | [`DisabledModel`] | none; every call fails |
//! | `"gemini"` | [`GeminiModel`] | `POST {url}/v1beta/models/{model}:generateContent` |
//! | `"openai"` | [`OpenAiModel`] | `POST {url}/v1/chat/completions` |
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx, network errors → retry
//! - other HTTP 4xx, disabled provider → fail immediately
//! - unrepairable JSON or a missing expected key → retry
//! - backoff: `retry_backoff_ms × 2^(attempt-1)`, exponent capped at 5

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use study_planner_core::analysis::check_expected_keys;
use study_planner_core::cache::{fingerprint, PhaseCache};
use study_planner_core::json_repair::parse_lenient;

use crate::config::AiConfig;
use crate::error::{AiFailure, AiModelError, AiPhaseError};

const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// A file sent alongside a prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl Attachment {
    pub fn pdf(name: &str, bytes: Arc<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            bytes,
        }
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub phase: String,
    pub prompt: String,
    pub attachment: Option<Attachment>,
    /// Short description of the JSON shape expected back.
    pub schema_hint: Option<String>,
}

/// A generative model: structured prompt (+ optional file) in, raw text out.
///
/// Parsing and retries belong to [`AiPhaseRunner`].
#[async_trait]
pub trait AiModel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`AiRequest::attachment`] is honored.
    fn accepts_files(&self) -> bool;

    async fn invoke(&self, request: &AiRequest) -> Result<String, AiModelError>;
}

// ============ Disabled ============

/// Used when `ai.provider = "disabled"`. Every call fails without retry.
pub struct DisabledModel;

#[async_trait]
impl AiModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn accepts_files(&self) -> bool {
        false
    }

    async fn invoke(&self, _request: &AiRequest) -> Result<String, AiModelError> {
        Err(AiModelError::Fatal("AI provider is disabled".to_string()))
    }
}

// ============ HTTP helpers ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send and classify: 2xx → JSON body, 429/5xx/network → retryable,
/// other statuses → fatal.
async fn send_json(request: reqwest::RequestBuilder, provider: &str) -> Result<Value, AiModelError> {
    let response = request
        .send()
        .await
        .map_err(|e| AiModelError::Retryable(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| AiModelError::Retryable(format!("{} returned unreadable body: {}", provider, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(AiModelError::Retryable(message))
    } else {
        Err(AiModelError::Fatal(message))
    }
}

fn trim_base(url: Option<&String>, default: &str) -> String {
    url.map(String::as_str)
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

// ============ Gemini ============

/// Google Gemini `generateContent`. Requires `GEMINI_API_KEY`.
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ai.model required for Gemini provider"))?;
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;
        Self::with_key(config, model, api_key)
    }

    fn with_key(config: &AiConfig, model: String, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: trim_base(config.url.as_ref(), GEMINI_DEFAULT_URL),
            model,
            api_key,
        })
    }
}

fn gemini_body(request: &AiRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(att) = &request.attachment {
        parts.push(json!({
            "inline_data": {
                "mime_type": att.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(att.bytes.as_slice()),
            }
        }));
    }
    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "temperature": 0.2,
        },
    });
    if let Some(hint) = &request.schema_hint {
        body["systemInstruction"] = json!({ "parts": [{ "text": hint }] });
    }
    body
}

fn parse_gemini_response(json: &Value) -> Result<String, AiModelError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| AiModelError::Retryable("Gemini response has no candidate content".to_string()))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(AiModelError::Retryable("Gemini returned empty text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl AiModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn accepts_files(&self) -> bool {
        true
    }

    async fn invoke(&self, request: &AiRequest) -> Result<String, AiModelError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let http = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&gemini_body(request));
        let json = send_json(http, "Gemini").await?;
        parse_gemini_response(&json)
    }
}

// ============ OpenAI-compatible ============

/// OpenAI-compatible chat completions. Requires `OPENAI_API_KEY`.
///
/// File payloads are not supported; callers send page text instead.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiModel {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ai.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_key(config, model, api_key)
    }

    fn with_key(config: &AiConfig, model: String, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: trim_base(config.url.as_ref(), OPENAI_DEFAULT_URL),
            model,
            api_key,
        })
    }
}

fn parse_openai_response(json: &Value) -> Result<String, AiModelError> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AiModelError::Retryable("OpenAI response has no message content".to_string()))
}

#[async_trait]
impl AiModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn accepts_files(&self) -> bool {
        false
    }

    async fn invoke(&self, request: &AiRequest) -> Result<String, AiModelError> {
        let system = request
            .schema_hint
            .clone()
            .unwrap_or_else(|| "Respond with a single JSON object.".to_string());
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": request.prompt },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2,
        });
        let http = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        let json = send_json(http, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Create the configured [`AiModel`].
///
/// | Config Value | Model |
/// |-------------|-------|
/// | `"disabled"` | [`DisabledModel`] |
/// | `"gemini"` | [`GeminiModel`] |
/// | `"openai"` | [`OpenAiModel`] |
pub fn create_model(config: &AiConfig) -> Result<Arc<dyn AiModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        other => bail!("Unknown AI provider: {}", other),
    }
}

/// Build a provider with an explicit key (used by HTTP tests).
pub fn create_model_with_key(config: &AiConfig, api_key: &str) -> Result<Arc<dyn AiModel>> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("ai.model required"))?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiModel::with_key(config, model, api_key.to_string())?)),
        "openai" => Ok(Arc::new(OpenAiModel::with_key(config, model, api_key.to_string())?)),
        other => bail!("provider '{}' does not take an API key", other),
    }
}

// ============ Phase runner ============

/// One phase invocation as seen by [`AiPhaseRunner::run`].
pub struct PhaseCall<'a> {
    pub phase: &'a str,
    pub prompt: &'a str,
    /// Page text or prior-phase JSON appended to the prompt.
    pub context: &'a str,
    pub attachment: Option<&'a Attachment>,
    pub expected_keys: &'a [&'a str],
    pub schema_hint: Option<&'a str>,
}

/// Invokes the model for one phase with caching, repair and bounded retry.
pub struct AiPhaseRunner {
    model: Arc<dyn AiModel>,
    cache: Arc<PhaseCache>,
    max_retries: u32,
    backoff: Duration,
}

impl AiPhaseRunner {
    pub fn new(model: Arc<dyn AiModel>, cache: Arc<PhaseCache>, config: &AiConfig) -> Self {
        Self {
            model,
            cache,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn model(&self) -> &dyn AiModel {
        self.model.as_ref()
    }

    pub fn cache(&self) -> &PhaseCache {
        &self.cache
    }

    /// Run a phase and return its parsed JSON.
    ///
    /// A cached response for the same fingerprint is returned without a
    /// model call. Repair happens before retry classification, so a
    /// response that repairs cleanly is never retried.
    pub async fn run(&self, call: PhaseCall<'_>) -> Result<Value, AiPhaseError> {
        let key = fingerprint(
            call.phase,
            call.prompt,
            call.context,
            call.attachment.map(|a| a.bytes.as_slice()),
        );
        if let Some(value) = self.cache.get(&key) {
            debug!(phase = call.phase, "phase cache hit");
            return Ok(value);
        }

        let request = AiRequest {
            phase: call.phase.to_string(),
            prompt: if call.context.is_empty() {
                call.prompt.to_string()
            } else {
                format!("{}\n\n{}", call.prompt, call.context)
            },
            attachment: call.attachment.cloned(),
            schema_hint: call.schema_hint.map(str::to_string),
        };

        let mut last_failure: Option<AiFailure> = None;
        let mut attempts = 0;

        for attempt in 0..=self.max_retries {
            if attempt > 0 && !self.backoff.is_zero() {
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            attempts = attempt + 1;

            let raw = match self.model.invoke(&request).await {
                Ok(raw) => raw,
                Err(e) if e.is_retryable() => {
                    warn!(phase = call.phase, attempt = attempts, error = %e, "model call failed; retrying");
                    last_failure = Some(e.into());
                    continue;
                }
                Err(e) => {
                    last_failure = Some(e.into());
                    break;
                }
            };

            let value = match parse_lenient(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(phase = call.phase, attempt = attempts, error = %e, "unparseable response");
                    last_failure = Some(e.into());
                    continue;
                }
            };

            if let Err(e) = check_expected_keys(&value, call.expected_keys) {
                warn!(phase = call.phase, attempt = attempts, error = %e, "response failed schema check");
                last_failure = Some(e.into());
                continue;
            }

            info!(phase = call.phase, attempt = attempts, "phase completed");
            self.cache.insert(key, value.clone());
            return Ok(value);
        }

        Err(AiPhaseError {
            phase: call.phase.to_string(),
            attempts,
            cause: last_failure
                .unwrap_or_else(|| AiModelError::Fatal("no attempt was made".to_string()).into()),
        })
    }
}
