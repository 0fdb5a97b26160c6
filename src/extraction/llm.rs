//! Language-model extraction over an OpenAI-compatible chat API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::patterns::sale_date;
use super::{clean_notice_text, ExtractionError, ExtractionStats, Extractor, StatsCounters};
use crate::models::ExtractionRecord;

const SYSTEM_PROMPT: &str = "You are a legal document parser that extracts structured information from foreclosure and bankruptcy notices.";

const EXTRACTION_PROMPT: &str = r#"Extract the following information from this foreclosure/bankruptcy notice and return ONLY a JSON object:

TEXT:
{content}

Extract these fields:
- first_name: The debtor/mortgagor's first name
- last_name: The debtor/mortgagor's last name
- street: Property street address (number and street name)
- city: Property city
- zip: Property ZIP code
- plaintiff: The creditor/bank/financial institution name

Return ONLY valid JSON in this exact format:
{"first_name": "John", "last_name": "Doe", "street": "123 Main St", "city": "Minneapolis", "zip": "55401", "plaintiff": "First National Bank"}

If a field cannot be found, use an empty string ""."#;

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Configuration for the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key. Extraction uses patterns only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// API endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Seconds before a request is abandoned.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    300
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl LlmConfig {
    /// Base default without env overrides.
    pub(crate) fn base_default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout: default_timeout(),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `OPENAI_API_KEY`: API key
    /// - `OPENAI_MODEL`: Model name
    /// - `OPENAI_BASE_URL`: Endpoint for OpenAI-compatible providers
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(endpoint) = std::env::var("OPENAI_BASE_URL") {
            self.endpoint = endpoint;
        }
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether the key has the provider's usual prefix. Does not contact the service.
    pub fn key_looks_valid(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| k.starts_with("sk-"))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Fields the model is asked for.
#[derive(Debug, Default, Deserialize)]
struct ModelAnswer {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    street: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    zip: String,
    #[serde(default)]
    plaintiff: String,
}

/// Extracts fields by asking a chat model for JSON.
pub struct LlmExtractor {
    config: LlmConfig,
    client: Client,
    stats: StatsCounters,
}

impl LlmExtractor {
    /// Create an extractor. Calls fail with [`ExtractionError::Disabled`] without a key.
    pub fn new(config: LlmConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ExtractionError::Connection(e.to_string()))?;
        Ok(Self {
            config,
            client,
            stats: StatsCounters::default(),
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ExtractionError::Disabled)?;
        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        self.stats.record_llm_call();
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractionError::Api(format!("HTTP {}: {}", status, body)));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ExtractionError::Parse(e.to_string()))?;
        if let Some(error) = chat.error {
            return Err(ExtractionError::Api(error.message));
        }
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExtractionError::Parse("Empty completion".to_string()))
    }
}

/// Read the model's JSON answer into a record. Text around the object is ignored.
fn parse_answer(text: &str, source_url: &str) -> Result<ExtractionRecord, ExtractionError> {
    let json = JSON_OBJECT
        .find(text)
        .ok_or_else(|| ExtractionError::Parse("No JSON object in answer".to_string()))?;
    let answer: ModelAnswer =
        serde_json::from_str(json.as_str()).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    Ok(ExtractionRecord {
        first_name: answer.first_name.trim().to_string(),
        last_name: answer.last_name.trim().to_string(),
        street: answer.street.trim().to_string(),
        city: answer.city.trim().to_string(),
        zip: answer.zip.trim().to_string(),
        plaintiff: answer.plaintiff.trim().to_string(),
        ..ExtractionRecord::for_source(source_url)
    })
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        content: &str,
        source_url: &str,
    ) -> Result<ExtractionRecord, ExtractionError> {
        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyContent);
        }
        self.stats.record_total();

        let cleaned = clean_notice_text(content);
        let prompt = EXTRACTION_PROMPT.replace("{content}", &cleaned);
        debug!("Asking {} to read {}", self.config.model, source_url);
        let answer = self.complete(&prompt).await?;

        let mut record = parse_answer(&answer, source_url)?;
        if !record.has_name() {
            return Err(ExtractionError::NothingFound);
        }
        // The model is not asked for dates.
        record.date_filed = sale_date(&cleaned).unwrap_or_default();
        self.stats.record_llm_success();
        Ok(record)
    }

    fn stats(&self) -> ExtractionStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_answer_with_surrounding_text() {
        let text = "Here you go:\n```json\n{\"first_name\": \" Jane \", \"last_name\": \"Doe\", \"city\": \"Duluth\"}\n```";
        let record = parse_answer(text, "https://example.com/1").unwrap();
        assert_eq!(record.first_name, "Jane");
        assert_eq!(record.last_name, "Doe");
        assert_eq!(record.city, "Duluth");
        assert_eq!(record.street, "");
        assert_eq!(record.state, "MN");
        assert_eq!(record.link, "https://example.com/1");
    }

    #[test]
    fn rejects_answer_without_json() {
        assert!(matches!(
            parse_answer("I cannot help with that", ""),
            Err(ExtractionError::Parse(_))
        ));
    }

    #[test]
    fn key_prefix_check() {
        let mut config = LlmConfig::base_default();
        assert!(!config.is_configured());
        config.api_key = Some("abc".into());
        assert!(!config.key_looks_valid());
        config.api_key = Some("sk-abc".into());
        assert!(config.key_looks_valid());
    }

    #[tokio::test]
    async fn unconfigured_extractor_is_disabled() {
        let extractor = LlmExtractor::new(LlmConfig::base_default()).unwrap();
        let result = extractor.extract("MORTGAGOR: Jane Doe", "").await;
        assert!(matches!(result, Err(ExtractionError::Disabled)));
        assert_eq!(extractor.stats().llm_calls, 0);
    }
}
