//! Tool invocation layer.
//!
//! Every capability the agent can call — cloud operations, document retrieval,
//! user memory — is exposed through the [`ToolProtocol`] trait and assembled
//! into a [`ToolRegistry`]. A protocol groups related tools (one per cloud
//! provider, one for retrieval, one for memory) and routes execution by tool
//! name; the registry maps the flat tool namespace back to the owning protocol.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Outcome of a single tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the tool completed successfully.
    pub success: bool,
    /// Structured output; for most cloud tools a JSON string or array.
    pub output: Value,
    /// Error message when `success` is false.
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        ToolResult {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Wrap a plain confirmation string, the common case for mutating cloud ops.
    pub fn text(message: impl Into<String>) -> Self {
        ToolResult::success(Value::String(message.into()))
    }
}

/// Parameter type surfaced in the tool catalog given to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolParameterType {
    String,
    Number,
    Boolean,
}

/// A single named parameter in a tool's input schema.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        ToolParameter {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Descriptive metadata for one callable tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolMetadata {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A group of tools sharing an execution backend.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Execute the named tool with the given JSON parameters.
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    /// Metadata for every tool this protocol serves.
    fn list_tools(&self) -> Vec<ToolMetadata>;

    /// Short name used in logs.
    fn protocol_name(&self) -> &str;
}

/// Errors raised by registry-level dispatch.
#[derive(Debug)]
pub enum ToolError {
    NotFound(String),
    InvalidParameters(String, String),
    ExecutionFailed(String, String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool '{}' not found", name),
            ToolError::InvalidParameters(name, msg) => {
                write!(f, "invalid parameters for '{}': {}", name, msg)
            }
            ToolError::ExecutionFailed(name, msg) => {
                write!(f, "execution of '{}' failed: {}", name, msg)
            }
        }
    }
}

impl Error for ToolError {}

/// Flat catalog of every tool available to the agent, with routing back to the
/// protocol that owns each name.
#[derive(Default)]
pub struct ToolRegistry {
    protocols: Vec<Arc<dyn ToolProtocol>>,
    routes: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        ToolRegistry::default()
    }

    /// Register a protocol and index every tool it serves.
    ///
    /// A tool name already claimed by an earlier protocol keeps its original
    /// route; the duplicate is logged and skipped.
    pub fn add_protocol(&mut self, protocol: Arc<dyn ToolProtocol>) {
        let index = self.protocols.len();
        for metadata in protocol.list_tools() {
            if self.routes.contains_key(&metadata.name) {
                log::warn!(
                    "tool '{}' from protocol '{}' shadows an existing registration, skipping",
                    metadata.name,
                    protocol.protocol_name()
                );
                continue;
            }
            self.routes.insert(metadata.name, index);
        }
        self.protocols.push(protocol);
    }

    /// Metadata for every registered tool, in registration order.
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = Vec::new();
        for (index, protocol) in self.protocols.iter().enumerate() {
            for metadata in protocol.list_tools() {
                if self.routes.get(&metadata.name) == Some(&index) {
                    tools.push(metadata);
                }
            }
        }
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Route an invocation to the owning protocol.
    pub async fn execute_tool(
        &self,
        name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let index = match self.routes.get(name) {
            Some(index) => *index,
            None => return Err(Box::new(ToolError::NotFound(name.to_string()))),
        };
        log::debug!("dispatching tool '{}'", name);
        self.protocols[index].execute(name, parameters).await
    }
}

/// Read a required string parameter out of a tool's JSON input.
pub fn require_str<'a>(
    parameters: &'a Value,
    tool_name: &str,
    key: &str,
) -> Result<&'a str, Box<dyn Error + Send + Sync>> {
    parameters
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Box::new(ToolError::InvalidParameters(
                tool_name.to_string(),
                format!("missing string field '{}'", key),
            )) as Box<dyn Error + Send + Sync>
        })
}

/// Read a required positive integer parameter, accepting JSON numbers or
/// numeric strings (models frequently quote numbers).
pub fn require_u64(
    parameters: &Value,
    tool_name: &str,
    key: &str,
) -> Result<u64, Box<dyn Error + Send + Sync>> {
    let value = parameters.get(key).ok_or_else(|| {
        Box::new(ToolError::InvalidParameters(
            tool_name.to_string(),
            format!("missing numeric field '{}'", key),
        )) as Box<dyn Error + Send + Sync>
    })?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| {
            Box::new(ToolError::InvalidParameters(
                tool_name.to_string(),
                format!("field '{}' is not a positive integer", key),
            )) as Box<dyn Error + Send + Sync>
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoProtocol {
        name: &'static str,
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolProtocol for EchoProtocol {
        async fn execute(
            &self,
            tool_name: &str,
            parameters: Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(json!({
                "tool": tool_name,
                "via": self.name,
                "params": parameters,
            })))
        }

        fn list_tools(&self) -> Vec<ToolMetadata> {
            self.tools
                .iter()
                .map(|t| ToolMetadata::new(*t, "echo"))
                .collect()
        }

        fn protocol_name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn registry_routes_by_tool_name() {
        let mut registry = ToolRegistry::empty();
        registry.add_protocol(Arc::new(EchoProtocol {
            name: "first",
            tools: vec!["alpha", "beta"],
        }));
        registry.add_protocol(Arc::new(EchoProtocol {
            name: "second",
            tools: vec!["gamma"],
        }));

        let result = registry
            .execute_tool("gamma", json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["via"], "second");
        assert_eq!(registry.list_tools().len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::empty();
        let err = registry.execute_tool("nope", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn duplicate_tool_names_keep_first_route() {
        let mut registry = ToolRegistry::empty();
        registry.add_protocol(Arc::new(EchoProtocol {
            name: "first",
            tools: vec!["shared"],
        }));
        registry.add_protocol(Arc::new(EchoProtocol {
            name: "second",
            tools: vec!["shared"],
        }));

        let result = registry.execute_tool("shared", Value::Null).await.unwrap();
        assert_eq!(result.output["via"], "first");
        assert_eq!(registry.list_tools().len(), 1);
    }

    #[test]
    fn require_u64_accepts_quoted_numbers() {
        let params = json!({"n": "15"});
        assert_eq!(require_u64(&params, "t", "n").unwrap(), 15);
        let params = json!({"n": 15});
        assert_eq!(require_u64(&params, "t", "n").unwrap(), 15);
        assert!(require_u64(&json!({}), "t", "n").is_err());
    }

    #[test]
    fn parameter_builder() {
        let param = ToolParameter::new("bucket_name", ToolParameterType::String)
            .with_description("Name of the bucket")
            .required();
        assert!(param.required);
        assert_eq!(param.description.as_deref(), Some("Name of the bucket"));
    }
}
