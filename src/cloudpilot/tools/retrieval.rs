//! Retrieval tool: similarity search over the document store, exposed to the
//! agent as `retrieve_documents`.
//!
//! Results come back two ways: a serialized block the model can quote, and a
//! structured list of source descriptors the HTTP layer surfaces to the
//! caller. The descriptors from the most recent search are parked here until
//! the chat boundary drains them, since tool output travels back to the agent
//! as text only.

use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::cloudpilot::documents::DocumentStore;
use crate::cloudpilot::tool_protocol::{
    ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};

const RETRIEVAL_K: usize = 3;

/// Provenance of one retrieved chunk, surfaced in the chat response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRef {
    pub source: String,
    pub label: String,
    pub score: f32,
}

pub struct RetrievalToolProtocol {
    documents: Arc<DocumentStore>,
    last_sources: Mutex<Vec<SourceRef>>,
}

impl RetrievalToolProtocol {
    pub fn new(documents: Arc<DocumentStore>) -> Self {
        RetrievalToolProtocol {
            documents,
            last_sources: Mutex::new(Vec::new()),
        }
    }

    /// Take the source descriptors recorded by the most recent search.
    pub fn drain_sources(&self) -> Vec<SourceRef> {
        self.last_sources
            .lock()
            .map(|mut sources| std::mem::take(&mut *sources))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ToolProtocol for RetrievalToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        if tool_name != "retrieve_documents" {
            return Err(Box::new(ToolError::NotFound(tool_name.to_string())));
        }
        let query = parameters
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        if query.is_empty() {
            return Ok(ToolResult::text("Please provide a query."));
        }

        let hits = self.documents.search(&query, RETRIEVAL_K).await?;
        let sources: Vec<SourceRef> = hits
            .iter()
            .map(|hit| SourceRef {
                source: hit.record.source.clone(),
                label: hit.record.source_label(),
                score: hit.score,
            })
            .collect();
        let serialized = hits
            .iter()
            .map(|hit| {
                format!(
                    "Source: {}\nContent: {}",
                    hit.record.source_label(),
                    hit.record.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        if let Ok(mut last) = self.last_sources.lock() {
            *last = sources;
        }
        Ok(ToolResult::text(serialized))
    }

    fn list_tools(&self) -> Vec<ToolMetadata> {
        vec![ToolMetadata::new(
            "retrieve_documents",
            "Search previously ingested documents for content relevant to a query.",
        )
        .with_parameter(
            ToolParameter::new("query", ToolParameterType::String)
                .with_description("Free-text query to search for")
                .required(),
        )]
    }

    fn protocol_name(&self) -> &str {
        "retrieval"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudpilot::documents::embedding::HashEmbedder;
    use crate::cloudpilot::provider::VectorBackend;
    use serde_json::json;
    use std::io::Write;

    async fn protocol_with_docs(dir: &tempfile::TempDir) -> RetrievalToolProtocol {
        let doc_path = dir.path().join("runbook.txt");
        let mut file = std::fs::File::create(&doc_path).unwrap();
        write!(file, "To restart the billing VM, stop it and start it again.").unwrap();

        let store = DocumentStore::open_at(
            VectorBackend::Flat,
            Arc::new(HashEmbedder::default()),
            dir.path(),
        )
        .unwrap();
        assert!(store.add_documents(&[doc_path], false).await.unwrap());
        RetrievalToolProtocol::new(Arc::new(store))
    }

    #[tokio::test]
    async fn empty_query_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let protocol = protocol_with_docs(&dir).await;
        let result = protocol
            .execute("retrieve_documents", json!({"query": "  "}))
            .await
            .unwrap();
        assert_eq!(result.output, "Please provide a query.");
        assert!(protocol.drain_sources().is_empty());
    }

    #[tokio::test]
    async fn search_serializes_hits_and_records_sources() {
        let dir = tempfile::tempdir().unwrap();
        let protocol = protocol_with_docs(&dir).await;
        let result = protocol
            .execute("retrieve_documents", json!({"query": "restart billing VM"}))
            .await
            .unwrap();
        let text = result.output.as_str().unwrap();
        assert!(text.starts_with("Source: "));
        assert!(text.contains("Content: To restart the billing VM"));

        let sources = protocol.drain_sources();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].source.ends_with("runbook.txt"));
        // Drained once, gone.
        assert!(protocol.drain_sources().is_empty());
    }
}
