//! Chat model clients.
//!
//! All three supported providers are reached over plain HTTPS: OpenAI and
//! Gemini through the OpenAI-compatible chat-completions surface
//! ([`openai_compat`]), watsonx through IBM's text-generation endpoint with an
//! IAM token exchange in front ([`watsonx`]).

pub mod openai_compat;
pub mod watsonx;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::cloudpilot::config::LlmSettings;
use crate::cloudpilot::provider::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => f.write_str("system"),
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversational model: messages in, one assistant reply out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Model identifier used in logs.
    fn model_name(&self) -> &str;
}

/// Build the configured chat client. Missing credentials for the selected
/// provider are a startup error.
pub fn build_chat_client(
    settings: &LlmSettings,
) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
    match settings.provider {
        LlmProvider::OpenAi => {
            let api_key = settings
                .openai_api_key
                .clone()
                .ok_or("LLM_OPENAI_API_KEY is not set")?;
            Ok(Arc::new(openai_compat::OpenAiCompatClient::openai(
                api_key,
                settings.openai_model.clone(),
            )?))
        }
        LlmProvider::Gemini => {
            let api_key = settings
                .gemini_api_key
                .clone()
                .ok_or("LLM_GEMINI_API_KEY is not set")?;
            Ok(Arc::new(openai_compat::OpenAiCompatClient::gemini(
                api_key,
                settings.gemini_model.clone(),
            )?))
        }
        LlmProvider::Watsonx => Ok(Arc::new(watsonx::WatsonxClient::from_settings(settings)?)),
    }
}
