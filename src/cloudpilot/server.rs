//! HTTP boundary: one chat endpoint and one resource summary endpoint.
//!
//! `POST /chat` takes multipart input (a `query` text field plus any number of
//! `files` parts), stages uploads under the configured staging directory,
//! ingests them into the document store, then runs the agent — the response
//! reports both the ingestion outcome and the agent's reply, so an upload
//! failure is never silently swallowed by a successful chat turn.
//!
//! `GET /cloud-resources` serves the cross-provider summary for the requested
//! (or configured) provider list.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::Value;

use crate::cloudpilot::agent::Agent;
use crate::cloudpilot::clients::{build_chat_client, ChatClient};
use crate::cloudpilot::clouds::aggregator::collect_cloud_resources;
use crate::cloudpilot::clouds::CloudRegistry;
use crate::cloudpilot::config::Settings;
use crate::cloudpilot::documents::embedding::HashEmbedder;
use crate::cloudpilot::documents::DocumentStore;
use crate::cloudpilot::provider::CloudProvider;
use crate::cloudpilot::tools::memory::MEMORY_FILE;
use crate::cloudpilot::tools::retrieval::{RetrievalToolProtocol, SourceRef};
use crate::cloudpilot::tools::{build_tools, ToolSuite};

/// Everything the handlers need, shared across requests.
pub struct AppState {
    settings: Settings,
    agent: Agent,
    clouds: Arc<CloudRegistry>,
    documents: Option<Arc<DocumentStore>>,
    retrieval: Option<Arc<RetrievalToolProtocol>>,
}

impl AppState {
    /// Build the full application from settings, including the configured
    /// chat client. Fails fast on missing LLM credentials or a broken loader
    /// table.
    pub fn build(settings: Settings) -> Result<Arc<Self>, Box<dyn Error + Send + Sync>> {
        let client = build_chat_client(&settings.llm)?;
        let store_dir = PathBuf::from(settings.vector_backend.persist_dir());
        Self::with_chat_client(settings, client, MEMORY_FILE, &store_dir)
    }

    /// Same as [`AppState::build`] with an injected chat client, memory path
    /// and index directory, the seam integration tests use.
    pub fn with_chat_client(
        settings: Settings,
        client: Arc<dyn ChatClient>,
        memory_path: &str,
        store_dir: &Path,
    ) -> Result<Arc<Self>, Box<dyn Error + Send + Sync>> {
        std::fs::create_dir_all(&settings.upload_dir)?;
        std::fs::create_dir_all(store_dir)?;

        let documents = Arc::new(DocumentStore::open_at(
            settings.vector_backend,
            Arc::new(HashEmbedder::default()),
            store_dir,
        )?);
        let clouds = Arc::new(CloudRegistry::from_settings(&settings));
        let ToolSuite {
            registry,
            retrieval,
        } = build_tools(
            &settings.cloud_providers,
            &clouds,
            Some(Arc::clone(&documents)),
            memory_path,
        )?;

        let agent = Agent::new(client, Arc::new(registry));
        Ok(Arc::new(AppState {
            settings,
            agent,
            clouds,
            documents: Some(documents),
            retrieval,
        }))
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    /// Whether uploaded files were ingested; absent when nothing was uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/cloud-resources", get(cloud_resources))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let bind_addr = state.settings.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("listening on {}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn cloud_resources(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let providers: Vec<CloudProvider> = match params.get("providers") {
        Some(list) => CloudProvider::parse_list(list),
        None => state.settings.cloud_providers.clone(),
    };
    let toolsets = state.clouds.toolsets_for(&providers);
    Json(collect_cloud_resources(&toolsets).await)
}

async fn chat(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let (query, staged) = read_chat_request(multipart, &state.settings.upload_dir)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let ingestion = match (&state.documents, staged.is_empty()) {
        (Some(documents), false) => {
            // Chat uploads are ingested whole; page splitting is opt-in for
            // bulk ingestion paths.
            let outcome = documents.add_documents(&staged, false).await.map_err(|err| {
                log::error!("ingestion failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            })?;
            documents
                .persist()
                .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
            Some(outcome)
        }
        _ => None,
    };

    let response = state.agent.respond(&query).await.map_err(|err| {
        log::error!("agent turn failed: {}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;
    let sources = state
        .retrieval
        .as_ref()
        .map(|retrieval| retrieval.drain_sources())
        .unwrap_or_default();

    Ok(Json(ChatResponse {
        reply: response.reply,
        ingestion,
        sources,
    }))
}

/// Pull the query text and stage uploaded files under the upload directory,
/// keeping their original names so ingestion records a meaningful source.
async fn read_chat_request(
    mut multipart: Multipart,
    upload_dir: &str,
) -> Result<(String, Vec<PathBuf>), Box<dyn Error + Send + Sync>> {
    let mut query = String::new();
    let mut staged = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("query") => {
                query = field.text().await?;
            }
            Some("files") => {
                let file_name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .filter(|n| !n.is_empty())
                    .ok_or("uploaded file part carries no file name")?;
                let bytes = field.bytes().await?;
                let path = Path::new(upload_dir).join(&file_name);
                tokio::fs::write(&path, &bytes).await?;
                log::info!("staged upload {} ({} bytes)", path.display(), bytes.len());
                staged.push(path);
            }
            _ => {}
        }
    }
    Ok((query, staged))
}

/// Strip any path components a client may have smuggled into the file name.
fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("dir/notes.txt"), "notes.txt");
    }

    #[test]
    fn chat_response_omits_empty_optional_fields() {
        let response = ChatResponse {
            reply: "done".to_string(),
            ingestion: None,
            sources: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"reply": "done"}));
    }
}
