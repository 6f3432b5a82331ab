//! The reasoning loop between the chat model and the tool registry.
//!
//! The tool catalog is embedded in the conversation rather than passed through
//! a provider-specific function-calling API, so every supported model speaks
//! the same dialect: to invoke a tool it answers with a JSON fragment of the
//! form `{"tool_call": {"name": "...", "parameters": {...}}}`. The agent
//! executes the tool, feeds the result back as a user-role message, and asks
//! again, for at most [`MAX_TOOL_ITERATIONS`] rounds.

use std::error::Error;
use std::sync::Arc;

use serde_json::Value;

use crate::cloudpilot::clients::{ChatClient, ChatMessage};
use crate::cloudpilot::tool_protocol::{ToolMetadata, ToolRegistry};

const MAX_TOOL_ITERATIONS: usize = 5;

/// One parsed tool invocation request from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: Value,
}

/// Final outcome of one agent turn.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub reply: String,
    pub tool_calls_made: usize,
}

pub struct Agent {
    client: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
}

impl Agent {
    pub fn new(client: Arc<dyn ChatClient>, tools: Arc<ToolRegistry>) -> Self {
        Agent {
            client,
            tools,
            system_prompt: "You are a cloud operations assistant. You manage virtual machines, \
                            object storage and monitoring data across AWS, Azure, GCP and IBM \
                            Cloud, answer questions about uploaded documents, and remember user \
                            details when asked."
                .to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Run one user turn through the tool loop.
    pub async fn respond(
        &self,
        user_message: &str,
    ) -> Result<AgentResponse, Box<dyn Error + Send + Sync>> {
        let mut messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(message_with_catalog(user_message, &self.tools.list_tools())),
        ];

        let mut reply = self.client.complete(&messages).await?;
        let mut tool_calls_made = 0;

        while tool_calls_made < MAX_TOOL_ITERATIONS {
            let call = match parse_tool_call(&reply) {
                Some(call) => call,
                None => break,
            };
            tool_calls_made += 1;
            log::info!("agent invoking tool '{}'", call.name);

            let feedback = match self.tools.execute_tool(&call.name, call.parameters).await {
                Ok(result) if result.success => format!(
                    "Tool '{}' returned: {}\n\nContinue answering the user's request. \
                     Reply with another tool_call JSON only if you need another tool.",
                    call.name, result.output
                ),
                Ok(result) => format!(
                    "Tool '{}' failed: {}",
                    call.name,
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                ),
                Err(err) => {
                    log::warn!("tool '{}' failed: {}", call.name, err);
                    format!("Tool '{}' failed: {}", call.name, err)
                }
            };

            messages.push(ChatMessage::assistant(&reply));
            messages.push(ChatMessage::user(feedback));
            reply = self.client.complete(&messages).await?;
        }

        if tool_calls_made == MAX_TOOL_ITERATIONS && parse_tool_call(&reply).is_some() {
            log::warn!("tool loop cap reached with a pending tool call");
        }

        Ok(AgentResponse {
            reply,
            tool_calls_made,
        })
    }
}

/// Append the tool catalog and calling convention to the user's message.
fn message_with_catalog(user_message: &str, tools: &[ToolMetadata]) -> String {
    let mut message = user_message.to_string();
    if tools.is_empty() {
        return message;
    }
    message.push_str("\n\nYou have access to the following tools:\n");
    for tool in tools {
        message.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        if !tool.parameters.is_empty() {
            message.push_str("  Parameters:\n");
            for param in &tool.parameters {
                message.push_str(&format!(
                    "    - {} ({:?}{}): {}\n",
                    param.name,
                    param.param_type,
                    if param.required { ", required" } else { "" },
                    param.description.as_deref().unwrap_or("No description")
                ));
            }
        }
    }
    message.push_str(
        "\nTo use a tool, respond with a JSON object in the following format:\n\
         {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
         After tool execution, I'll provide the result and you can continue.\n",
    );
    message
}

/// Extract the first `{"tool_call": ...}` fragment from a model response.
///
/// Brace-counting finds the matching closing brace so tool calls embedded in
/// surrounding prose still parse; anything that is not valid JSON with both a
/// name and parameters is treated as no call at all.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start = response.find("{\"tool_call\"")?;
    let mut depth = 0usize;
    let mut end = None;
    for (offset, ch) in response[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + ch.len_utf8());
                    break;
                }
            }
            _ => {}
        }
    }
    let fragment = &response[start..end?];
    let parsed: Value = serde_json::from_str(fragment).ok()?;
    let call = parsed.get("tool_call")?;
    let name = call.get("name")?.as_str()?;
    let parameters = call.get("parameters")?;
    Some(ToolCall {
        name: name.to_string(),
        parameters: parameters.clone(),
    })
}
