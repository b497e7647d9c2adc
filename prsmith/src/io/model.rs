//! Language model client.
//!
//! The [`ModelClient`] trait decouples plan generation from the HTTP backend.
//! Tests use scripted models that return predetermined replies.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::text::cap_chars;
use crate::io::config::ModelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Abstraction over chat-completion backends.
pub trait ModelClient {
    /// Send the conversation and return the raw text of the reply.
    fn complete(&self, messages: &[Message]) -> Result<String>;
}

// OpenAI-compatible wire types.

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for `POST {endpoint}/chat/completions`.
pub struct HttpModelClient {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl std::fmt::Debug for HttpModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpModelClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build model HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key: api_key.into(),
        })
    }
}

impl ModelClient for HttpModelClient {
    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    fn complete(&self, messages: &[Message]) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("model HTTP request failed")?;

        let status = resp.status();
        let text = resp.text().context("read model response body")?;
        if !status.is_success() {
            return Err(anyhow!("model API returned {status}: {}", cap_chars(&text, 500)));
        }
        let parsed: ChatResponse =
            serde_json::from_str(&text).context("parse model response JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("model response has no message content"))?;
        debug!(chars = content.chars().count(), "model reply received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_openai_shape() {
        let messages = [Message::system("rules"), Message::user("task")];
        let body = ChatRequest {
            model: "m",
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: 10,
            temperature: 0.2,
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "task");
        assert_eq!(value["max_tokens"], 10);
    }

    #[test]
    fn response_without_content_parses_to_none() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#)
                .expect("parse");
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let config = ModelConfig {
            endpoint: "http://127.0.0.1:9/v1/".to_string(),
            ..ModelConfig::default()
        };
        let client = HttpModelClient::new(&config, "k").expect("client");
        assert_eq!(client.url, "http://127.0.0.1:9/v1/chat/completions");
        assert!(!format!("{client:?}").contains("api_key"));
    }
}
