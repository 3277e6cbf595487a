//! LLM capability: an OpenAI-compatible chat-completions backend plus a
//! local Ollama backend, behind one trait. Enrichment prompts expect strict
//! JSON; `extract_json_from_text` tolerates markdown-fenced replies.

use async_trait::async_trait;
use ollama_rs::{generation::completion::request::GenerationRequest, Ollama};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::data::retry::retry_with_backoff;
use crate::data::{DataError, DataResult};

/// LLM response with usage metadata when the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> DataResult<LlmResponse>;

    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;
}

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> DataResult<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DataError::api_error(
                status_code,
                format!("chat completions: {}", error_text),
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| DataError::parse_error("no message content in completion"))?
            .to_string();

        Ok(LlmResponse {
            text,
            model: self.model.clone(),
            prompt_tokens: body["usage"]["prompt_tokens"].as_u64().map(|v| v as u32),
            completion_tokens: body["usage"]["completion_tokens"].as_u64().map(|v| v as u32),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatClient {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> DataResult<LlmResponse> {
        retry_with_backoff(|| self.chat(system, user, max_tokens, temperature), 3).await
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Local Ollama backend.
pub struct OllamaClient {
    ollama: Ollama,
    model: String,
    timeout_seconds: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String, timeout_seconds: u64) -> DataResult<Self> {
        let parsed_url = Url::parse(base_url)
            .map_err(|e| DataError::Config(format!("Invalid Ollama URL: {}", e)))?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| DataError::Config("No host in Ollama URL".to_string()))?;
        let port = parsed_url.port().unwrap_or(11434);

        let scheme_host = format!("{}://{}", parsed_url.scheme(), host);
        Ok(Self {
            ollama: Ollama::new(scheme_host, port),
            model,
            timeout_seconds,
        })
    }

    /// Verify connectivity and warn when the configured model is missing.
    pub async fn health_check(&self) -> DataResult<()> {
        match timeout(Duration::from_secs(10), self.ollama.list_local_models()).await {
            Ok(Ok(models)) => {
                let available = models.iter().any(|m| m.name.contains(&self.model));
                if !available {
                    warn!(
                        "Model '{}' not found locally. Pull it with: ollama pull {}",
                        self.model, self.model
                    );
                }
                Ok(())
            }
            Ok(Err(e)) => Err(DataError::Internal(format!(
                "Ollama API error when listing models: {}. Is Ollama running?",
                e
            ))),
            Err(_) => Err(DataError::Timeout { timeout_seconds: 10 }),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        _max_tokens: u32,
        _temperature: f64,
    ) -> DataResult<LlmResponse> {
        let prompt = if system.is_empty() {
            user.to_string()
        } else {
            format!("{}\n\n{}", system, user)
        };
        let request = GenerationRequest::new(self.model.clone(), prompt);

        match timeout(
            Duration::from_secs(self.timeout_seconds),
            self.ollama.generate(request),
        )
        .await
        {
            Ok(Ok(response)) => Ok(LlmResponse {
                text: response.response,
                model: self.model.clone(),
                prompt_tokens: None,
                completion_tokens: None,
            }),
            Ok(Err(e)) => Err(DataError::Internal(format!("Ollama API error: {}", e))),
            Err(_) => Err(DataError::Timeout {
                timeout_seconds: self.timeout_seconds,
            }),
        }
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Primary model plus optional comparison providers. The primary drives
/// decisions; secondaries run the same prompt for offline comparison.
pub struct LlmRouter {
    pub primary: Arc<dyn LlmProvider>,
    pub secondaries: Vec<Arc<dyn LlmProvider>>,
}

impl LlmRouter {
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> DataResult<LlmResponse> {
        self.primary
            .generate(system, user, max_tokens, temperature)
            .await
    }

    /// Fan the prompt out to every secondary concurrently. Failures are
    /// recorded per provider, never propagated.
    pub async fn compare(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Vec<(String, String, Result<LlmResponse, String>)> {
        let mut handles = Vec::new();
        for provider in &self.secondaries {
            let provider = Arc::clone(provider);
            let system = system.to_string();
            let user = user.to_string();
            handles.push(tokio::spawn(async move {
                let name = provider.provider_name().to_string();
                let model = provider.model().to_string();
                let result = provider
                    .generate(&system, &user, max_tokens, temperature)
                    .await
                    .map_err(|e| e.to_string());
                (name, model, result)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            if let Ok(entry) = handle.await {
                results.push(entry);
            }
        }
        results
    }
}

/// Build one provider by name ("openai" for any OpenAI-compatible endpoint,
/// "ollama" for a local model).
pub fn build_llm_provider(
    provider: &str,
    model: &str,
    config: &Config,
) -> DataResult<Arc<dyn LlmProvider>> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiCompatClient::new(
            config.llm.base_url.clone(),
            model.to_string(),
            config.llm.api_key.clone(),
            config.llm.timeout_seconds,
        ))),
        "ollama" => {
            let client = OllamaClient::new(
                "http://localhost:11434",
                model.to_string(),
                config.llm.timeout_seconds,
            )?;
            Ok(Arc::new(client))
        }
        other => Err(DataError::Config(format!("Unknown LLM provider: {}", other))),
    }
}

/// Build the router from configuration: the configured primary model plus
/// every `llm_compare_models` entry.
pub fn build_llm_router(config: &Config) -> DataResult<LlmRouter> {
    let primary: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.api_key.clone(),
        config.llm.timeout_seconds,
    ));

    let mut secondaries = Vec::new();
    for (provider, model) in &config.llm.compare_models {
        match build_llm_provider(provider, model, config) {
            Ok(p) => secondaries.push(p),
            Err(e) => warn!("Skipping comparison provider {}|{}: {}", provider, model, e),
        }
    }

    if !secondaries.is_empty() {
        info!("LLM comparison enabled for {} providers", secondaries.len());
    }

    Ok(LlmRouter { primary, secondaries })
}

/// Extract the first JSON value (object or array) from an LLM reply that
/// may wrap it in a markdown fence or surrounding prose. A fenced block is
/// preferred when it contains a value; otherwise the raw reply is scanned.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    if let Some(block) = fenced_block(text) {
        if let Some(value) = scan_json_value(block) {
            return Some(value.to_string());
        }
    }
    scan_json_value(text).map(str::to_string)
}

/// Body of the first ``` fence, with an optional `json` language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let after_open = text.split_once("```")?.1;
    let body = after_open.strip_prefix("json").unwrap_or(after_open);
    Some(body.split_once("```")?.0)
}

/// Locate the first balanced `{...}` or `[...]` span. Delimiters inside
/// string literals (including escaped quotes) are ignored, so prose like
/// `{"note": "see} above"}` still scans correctly.
fn scan_json_value(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let bytes = text.as_bytes();
    let (open, close) = if bytes[start] == b'{' {
        (b'{', b'}')
    } else {
        (b'[', b']')
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        if byte == b'"' {
            in_string = true;
        } else if byte == open {
            depth += 1;
        } else if byte == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..=i]);
            }
        }
    }

    None
}

/// Parse a strict-JSON reply into a typed value.
pub fn parse_json_reply<T>(text: &str) -> DataResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let json_content = extract_json_from_text(text)
        .ok_or_else(|| DataError::parse_error("No valid JSON found in LLM reply"))?;
    serde_json::from_str(&json_content).map_err(DataError::from)
}
