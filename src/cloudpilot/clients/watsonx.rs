//! Chat client for IBM watsonx.ai text generation.
//!
//! watsonx has no bearer-key auth; every call rides on an IAM-issued token,
//! so this client shares the cached IAM exchange the IBM cloud tool set uses.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cloudpilot::clouds::ibm::IamTokenSource;
use crate::cloudpilot::config::LlmSettings;

use super::{ChatClient, ChatMessage, Role};

pub struct WatsonxClient {
    http: reqwest::Client,
    tokens: IamTokenSource,
    base_url: String,
    project_id: String,
    model: String,
    api_version: String,
}

impl WatsonxClient {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = settings
            .watsonx_api_key
            .clone()
            .ok_or("LLM_WATSONX_API_KEY is not set")?;
        let base_url = settings
            .watsonx_url
            .clone()
            .ok_or("LLM_WATSONX_URL is not set")?;
        let project_id = settings
            .watsonx_project_id
            .clone()
            .ok_or("LLM_WATSONX_PROJECT_ID is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(WatsonxClient {
            tokens: IamTokenSource::new(http.clone(), api_key),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            model: settings.watsonx_model.clone(),
            api_version: settings.watsonx_api_version.clone(),
        })
    }
}

/// watsonx takes a single prompt string; fold the chat transcript into the
/// familiar role-prefixed form.
fn render_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Assistant:");
    prompt
}

fn parse_generation(json: &Value) -> Result<String, Box<dyn Error + Send + Sync>> {
    json["results"][0]["generated_text"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| "watsonx response carries no generated_text".into())
}

#[async_trait]
impl ChatClient for WatsonxClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(format!(
                "{}/ml/v1/text/generation?version={}",
                self.base_url, self.api_version
            ))
            .bearer_auth(token)
            .json(&json!({
                "model_id": self.model,
                "project_id": self.project_id,
                "input": render_prompt(messages),
                "parameters": { "max_new_tokens": 1024 },
            }))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(format!("watsonx request failed (HTTP {}): {}", status, body).into());
        }
        parse_generation(&body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_renders_roles_in_order() {
        let prompt = render_prompt(&[
            ChatMessage::system("Be concise."),
            ChatMessage::user("List my VMs."),
        ]);
        assert!(prompt.starts_with("System: Be concise.\n\nUser: List my VMs.\n\n"));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn generated_text_is_extracted_and_trimmed() {
        let body = json!({"results": [{"generated_text": "  Two VMs are running. "}]});
        assert_eq!(parse_generation(&body).unwrap(), "Two VMs are running.");
        assert!(parse_generation(&json!({"results": []})).is_err());
    }
}
