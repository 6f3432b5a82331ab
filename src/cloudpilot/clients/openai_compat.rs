//! Chat client for OpenAI-compatible chat-completions endpoints.
//!
//! Gemini is served through Google's OpenAI-compatibility layer, so one
//! client covers both providers with different base URLs.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ChatClient, ChatMessage};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(OpenAiCompatClient {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn openai(api_key: String, model: String) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Self::new(OPENAI_BASE_URL, api_key, model)
    }

    pub fn gemini(api_key: String, model: String) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Self::new(GEMINI_BASE_URL, api_key, model)
    }
}

/// First choice's message content out of a chat-completions response.
fn parse_completion(json: &Value) -> Result<String, Box<dyn Error + Send + Sync>> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| "chat response carries no message content".into())
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
            }))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(format!("chat request failed (HTTP {}): {}", status, body).into());
        }
        parse_completion(&body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_content_is_extracted() {
        let body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "All VMs are healthy."}}
            ]
        });
        assert_eq!(parse_completion(&body).unwrap(), "All VMs are healthy.");
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert!(parse_completion(&json!({"choices": []})).is_err());
        assert!(parse_completion(&json!({})).is_err());
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let message = ChatMessage::system("You are a cloud assistant.");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "system");
        assert_eq!(value["content"], "You are a cloud assistant.");
    }
}
