//! Agent loop behavior with a scripted chat model and real tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cloudpilot::clients::{ChatClient, ChatMessage};
use cloudpilot::tools::memory::{MemoryStore, MemoryToolProtocol};
use cloudpilot::{Agent, ToolRegistry};

/// Replays a fixed sequence of responses, one per completion call.
struct ScriptedClient {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(ScriptedClient {
            responses: responses.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(call)
            .cloned()
            .ok_or_else(|| "script exhausted".into())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn memory_registry(dir: &tempfile::TempDir) -> Arc<ToolRegistry> {
    let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
    let mut registry = ToolRegistry::empty();
    registry.add_protocol(Arc::new(MemoryToolProtocol::new(store)));
    Arc::new(registry)
}

#[tokio::test]
async fn plain_answers_pass_through_without_tool_calls() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(&["Nothing to do here."]);
    let agent = Agent::new(client, memory_registry(&dir));

    let response = agent.respond("say hi").await.unwrap();
    assert_eq!(response.reply, "Nothing to do here.");
    assert_eq!(response.tool_calls_made, 0);
}

#[tokio::test]
async fn tool_calls_execute_and_feed_back_into_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(&[
        r#"{"tool_call": {"name": "save_user_info", "parameters": {"user_id": "u1", "user_info": "prefers spot instances"}}}"#,
        "Saved, u1 prefers spot instances.",
    ]);
    let agent = Agent::new(client, memory_registry(&dir));

    let response = agent
        .respond("remember that I prefer spot instances")
        .await
        .unwrap();
    assert_eq!(response.reply, "Saved, u1 prefers spot instances.");
    assert_eq!(response.tool_calls_made, 1);

    // The tool really ran: a second turn can read the stored value back.
    let client = ScriptedClient::new(&[
        r#"{"tool_call": {"name": "get_user_info", "parameters": {"user_id": "u1"}}}"#,
        "You prefer spot instances.",
    ]);
    let agent = Agent::new(client, memory_registry(&dir));
    let response = agent.respond("what do I prefer?").await.unwrap();
    assert_eq!(response.tool_calls_made, 1);
    assert_eq!(response.reply, "You prefer spot instances.");
}

#[tokio::test]
async fn unknown_tools_surface_as_feedback_not_errors() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(&[
        r#"{"tool_call": {"name": "launch_rocket", "parameters": {}}}"#,
        "That tool does not exist, sorry.",
    ]);
    let agent = Agent::new(client, memory_registry(&dir));

    let response = agent.respond("launch").await.unwrap();
    assert_eq!(response.reply, "That tool does not exist, sorry.");
    assert_eq!(response.tool_calls_made, 1);
}

#[tokio::test]
async fn tool_loop_is_capped_at_five_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let call = r#"{"tool_call": {"name": "get_user_info", "parameters": {"user_id": "u1"}}}"#;
    // Six scripted tool calls; only five may execute.
    let client = ScriptedClient::new(&[call, call, call, call, call, call]);
    let agent = Agent::new(client, memory_registry(&dir));

    let response = agent.respond("loop forever").await.unwrap();
    assert_eq!(response.tool_calls_made, 5);
    // The cap leaves the final (unexecuted) tool call as the reply.
    assert!(response.reply.contains("tool_call"));
}
