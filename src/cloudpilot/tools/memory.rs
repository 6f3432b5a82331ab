//! Durable user-memory tools.
//!
//! A flat JSON file keyed by namespace; the only namespace in use today is
//! `users`. Saves rewrite the whole file, which is fine at the scale of a
//! per-user info blob.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::cloudpilot::tool_protocol::{
    require_str, ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol,
    ToolResult,
};

pub const MEMORY_FILE: &str = "./user_memory.json";
const USERS_NAMESPACE: &str = "users";

type Namespaces = HashMap<String, HashMap<String, String>>;

/// File-backed key-value store with namespaced entries.
pub struct MemoryStore {
    path: PathBuf,
    entries: Mutex<Namespaces>,
}

impl MemoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.into();
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Namespaces::new()
        };
        Ok(MemoryStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(namespace)?.get(key).cloned()
    }

    pub fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "memory store lock poisoned")?;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        std::fs::write(&self.path, serde_json::to_string_pretty(&*entries)?)?;
        Ok(())
    }
}

/// `get_user_info` / `save_user_info` over a [`MemoryStore`].
pub struct MemoryToolProtocol {
    store: MemoryStore,
}

impl MemoryToolProtocol {
    pub fn new(store: MemoryStore) -> Self {
        MemoryToolProtocol { store }
    }
}

#[async_trait]
impl ToolProtocol for MemoryToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        match tool_name {
            "get_user_info" => {
                let user_id = require_str(&parameters, tool_name, "user_id")?;
                let info = self
                    .store
                    .get(USERS_NAMESPACE, user_id)
                    .unwrap_or_else(|| "Unknown user".to_string());
                Ok(ToolResult::text(info))
            }
            "save_user_info" => {
                let user_id = require_str(&parameters, tool_name, "user_id")?;
                let user_info = require_str(&parameters, tool_name, "user_info")?;
                self.store.put(USERS_NAMESPACE, user_id, user_info)?;
                Ok(ToolResult::text("Successfully saved user info."))
            }
            other => Err(Box::new(ToolError::NotFound(other.to_string()))),
        }
    }

    fn list_tools(&self) -> Vec<ToolMetadata> {
        let user_id_param = || {
            ToolParameter::new("user_id", ToolParameterType::String)
                .with_description("Identifier of the user")
                .required()
        };
        vec![
            ToolMetadata::new("get_user_info", "Look up stored information about a user.")
                .with_parameter(user_id_param()),
            ToolMetadata::new("save_user_info", "Store information about a user.")
                .with_parameter(user_id_param())
                .with_parameter(
                    ToolParameter::new("user_info", ToolParameterType::String)
                        .with_description("Information to remember")
                        .required(),
                ),
        ]
    }

    fn protocol_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn protocol_in(dir: &tempfile::TempDir) -> MemoryToolProtocol {
        let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
        MemoryToolProtocol::new(store)
    }

    #[tokio::test]
    async fn unknown_user_yields_fixed_string() {
        let dir = tempfile::tempdir().unwrap();
        let protocol = protocol_in(&dir);
        let result = protocol
            .execute("get_user_info", json!({"user_id": "u42"}))
            .await
            .unwrap();
        assert_eq!(result.output, "Unknown user");
    }

    #[tokio::test]
    async fn save_then_get_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let protocol = protocol_in(&dir);
            let result = protocol
                .execute(
                    "save_user_info",
                    json!({"user_id": "u42", "user_info": "prefers eu-west-1"}),
                )
                .await
                .unwrap();
            assert_eq!(result.output, "Successfully saved user info.");
        }
        let protocol = MemoryToolProtocol::new(
            MemoryStore::open(dir.path().join("memory.json")).unwrap(),
        );
        let result = protocol
            .execute("get_user_info", json!({"user_id": "u42"}))
            .await
            .unwrap();
        assert_eq!(result.output, "prefers eu-west-1");
    }

    #[tokio::test]
    async fn missing_user_id_is_invalid_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let protocol = protocol_in(&dir);
        let err = protocol
            .execute("get_user_info", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("user_id"));
    }
}
