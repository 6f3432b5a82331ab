//! Tool catalog assembly.
//!
//! [`build_tools`] produces the complete tool surface handed to the agent:
//! memory tools always, one cloud protocol per requested provider, the
//! cross-provider aggregator always, and the retrieval tool when a document
//! store is available.

pub mod memory;
pub mod retrieval;

use std::error::Error;
use std::sync::Arc;

use crate::cloudpilot::clouds::aggregator::AggregatorToolProtocol;
use crate::cloudpilot::clouds::CloudRegistry;
use crate::cloudpilot::documents::DocumentStore;
use crate::cloudpilot::provider::CloudProvider;
use crate::cloudpilot::tool_protocol::{ToolProtocol, ToolRegistry};

use memory::{MemoryStore, MemoryToolProtocol};
use retrieval::RetrievalToolProtocol;

/// The assembled tool surface plus the retrieval handle the chat boundary
/// drains source descriptors from.
pub struct ToolSuite {
    pub registry: ToolRegistry,
    pub retrieval: Option<Arc<RetrievalToolProtocol>>,
}

/// Assemble the agent's tool registry.
pub fn build_tools(
    providers: &[CloudProvider],
    clouds: &CloudRegistry,
    documents: Option<Arc<DocumentStore>>,
    memory_path: &str,
) -> Result<ToolSuite, Box<dyn Error + Send + Sync>> {
    let mut registry = ToolRegistry::empty();

    let store = MemoryStore::open(memory_path)?;
    registry.add_protocol(Arc::new(MemoryToolProtocol::new(store)));

    for protocol in clouds.protocols_for(providers) {
        registry.add_protocol(protocol);
    }
    registry.add_protocol(Arc::new(AggregatorToolProtocol::new(
        clouds.toolsets_for(providers),
    )));

    let retrieval = match documents {
        Some(documents) => {
            let protocol = Arc::new(RetrievalToolProtocol::new(documents));
            registry.add_protocol(Arc::clone(&protocol) as Arc<dyn ToolProtocol>);
            Some(protocol)
        }
        None => None,
    };

    Ok(ToolSuite {
        registry,
        retrieval,
    })
}
