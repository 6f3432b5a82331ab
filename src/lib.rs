//! # Cloudpilot
//!
//! Cloudpilot is a multi-cloud operations assistant: an LLM-powered agent that manages
//! virtual machines and object storage across AWS, Azure, GCP and IBM Cloud, answers
//! questions over uploaded documents, and remembers facts about its users — all behind a
//! small HTTP chat surface.
//!
//! The crate is layered as follows:
//!
//! * **Cloud tool sets**: each provider exposes the same operation catalog (list/start/stop
//!   VMs, list/create buckets, upload files, CPU usage) through [`clouds::ProviderToolSet`],
//!   backed by lazily constructed, cached API clients in a [`clouds::CloudRegistry`]
//! * **Aggregator**: [`clouds::aggregator`] fans a "list everything" request across the
//!   configured providers and isolates per-provider failures
//! * **Document store**: [`documents::DocumentStore`] ingests pdf/html/office/text files,
//!   chunks and embeds them, and serves k-nearest retrieval over one of three
//!   vector backends
//! * **Agent**: [`Agent`] runs the reasoning loop — it advertises the tool catalog to the
//!   model, parses `{"tool_call": ...}` requests out of completions, executes them through
//!   the [`tool_protocol::ToolRegistry`], and feeds results back
//! * **HTTP surface**: [`server`] exposes `POST /chat` (query + file uploads) and
//!   `GET /cloud-resources`
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use cloudpilot::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     cloudpilot::init_logger();
//!     let settings = Settings::from_env()?;
//!     let state = cloudpilot::server::AppState::build(settings)?;
//!     cloudpilot::server::serve(state).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Diagnostics are driven by `RUST_LOG`; calling this more than once is harmless.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod cloudpilot;

pub use cloudpilot::agent::{Agent, AgentResponse};
pub use cloudpilot::clients;
pub use cloudpilot::clients::ChatClient;
pub use cloudpilot::clouds;
pub use cloudpilot::clouds::CloudRegistry;
pub use cloudpilot::config;
pub use cloudpilot::config::Settings;
pub use cloudpilot::documents;
pub use cloudpilot::documents::DocumentStore;
pub use cloudpilot::provider;
pub use cloudpilot::provider::{CloudProvider, LlmProvider, VectorBackend};
pub use cloudpilot::server;
pub use cloudpilot::tool_protocol;
pub use cloudpilot::tool_protocol::{ToolProtocol, ToolRegistry, ToolResult};
pub use cloudpilot::tools;
