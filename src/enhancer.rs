//! LLM rewrite of sample descriptions before they are embedded.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Produces the description stored for a sample record.
pub trait DescriptionEnhancer: Send + Sync {
    /// Returns a retrieval-oriented description of `code`, informed by the documented one.
    fn enhance(&self, title: &str, description: &str, code: &str) -> Result<String, ProviderError>;
}

/// Keeps the documented description unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

impl DescriptionEnhancer for PassthroughEnhancer {
    fn enhance(
        &self,
        _title: &str,
        description: &str,
        _code: &str,
    ) -> Result<String, ProviderError> {
        Ok(description.to_string())
    }
}

/// Sampling settings for [`OpenAiEnhancer`].
#[derive(Debug, Clone)]
pub struct EnhancerSettings {
    /// Chat model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
    /// Product name used in the prompt.
    pub product: String,
    /// Code language label used in the prompt.
    pub language: String,
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.4,
            max_tokens: 300,
            product: "Fusion 360".to_string(),
            language: "Python".to_string(),
        }
    }
}

/// OpenAI-compatible chat-completions enhancer.
pub struct OpenAiEnhancer {
    client: Client,
    endpoint: String,
    settings: EnhancerSettings,
}

impl OpenAiEnhancer {
    /// Builds a new enhancer client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
        settings: EnhancerSettings,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI chat client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            settings,
        })
    }
}

impl DescriptionEnhancer for OpenAiEnhancer {
    fn enhance(&self, title: &str, description: &str, code: &str) -> Result<String, ProviderError> {
        let system = format!(
            "You are a {} expert that generates clear, technical descriptions for RAG applications.",
            self.settings.product
        );
        let prompt = build_prompt(&self.settings, title, description, code);
        let body = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };
        let resp = self.client.post(&self.endpoint).json(&body).send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: ChatResponse = resp.json()?;
        parsed
            .choices
            .into_iter()
            .map(|choice| choice.message.content.trim().to_string())
            .find(|answer| !answer.is_empty())
            .ok_or_else(|| ProviderError::Malformed("chat response missing content".into()))
    }
}

fn build_prompt(settings: &EnhancerSettings, title: &str, description: &str, code: &str) -> String {
    format!(
        "Generate a concise, high-quality description (one paragraph) of the {product} sample \
         \"{title}\" for use in a retrieval system.\n\n\
         Official documentation description:\n{description}\n\n\
         Explain what the script does, how it uses the {product} API, and the operations it \
         performs:\n{language}\n{code}\n\n\
         Constraints:\n\
         - Output only the description.\n\
         - Do not exceed one paragraph.\n\
         - Do not include any additional commentary or formatting.",
        product = settings.product,
        language = settings.language,
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}
