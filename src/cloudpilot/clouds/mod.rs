//! Cloud provider tool sets.
//!
//! Every provider implements the same operation catalog behind
//! [`ProviderToolSet`]; [`CloudToolProtocol`] adapts a tool set to the agent's
//! tool-invocation shape with provider-prefixed names. Clients are built
//! lazily through [`registry::ClientSlot`]s owned by each tool set, so a
//! process that never touches a provider never authenticates against it.

pub mod aggregator;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod ibm;
pub mod registry;
pub mod sigv4;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cloudpilot::config::Settings;
use crate::cloudpilot::provider::CloudProvider;
use crate::cloudpilot::tool_protocol::{
    require_str, require_u64, ToolError, ToolMetadata, ToolParameter, ToolParameterType,
    ToolProtocol, ToolResult,
};

pub use registry::ClientSlot;

/// Error from a provider HTTP API, keeping the status code so auth failures
/// stay distinguishable.
#[derive(Debug, Clone)]
pub struct CloudApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl CloudApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        CloudApiError {
            status,
            message: message.into(),
        }
    }

    /// 401/403 — the signal the IBM retry wrapper keys on.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for CloudApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "provider API error (HTTP {}): {}", code, self.message),
            None => write!(f, "provider API error: {}", self.message),
        }
    }
}

impl Error for CloudApiError {}

impl From<reqwest::Error> for CloudApiError {
    fn from(err: reqwest::Error) -> Self {
        CloudApiError::new(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// The uniform operation catalog every provider implements.
///
/// Provider-specific scoping (region, zone, resource group, VPC id) comes from
/// configuration and never leaks into these signatures.
#[async_trait]
pub trait ProviderToolSet: Send + Sync {
    fn provider(&self) -> CloudProvider;

    /// Names of running virtual machines. Empty vec, never an error, when the
    /// account simply has none.
    async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    async fn start_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>>;

    async fn stop_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Bucket (or, given an `account`, Azure blob container) names. Providers
    /// without account scoping ignore the argument.
    async fn list_buckets(
        &self,
        account: Option<&str>,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    /// `account` is only meaningful for Azure (the storage account holding the
    /// container); other providers ignore it.
    async fn create_bucket(
        &self,
        name: &str,
        account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Upload a local file. Errors are surfaced here; the tool protocol layer
    /// degrades them to a user-facing failure string.
    async fn upload_file_to_bucket(
        &self,
        file_path: &str,
        bucket: &str,
        object_name: &str,
        account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Whether this provider serves the CPU-usage tool. IBM Cloud does not.
    fn supports_cpu_usage(&self) -> bool {
        true
    }

    /// Formatted average CPU percentage over the past `minutes`, or the
    /// provider's fixed "no data" string.
    async fn list_vm_cpu_usage(
        &self,
        instance: &str,
        minutes: u64,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Uniform mean over raw datapoints; `None` for an empty set so callers can
/// emit the "no data" message instead of a zero average.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn file_basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Adapts one [`ProviderToolSet`] to the agent-facing tool protocol, exposing
/// the catalog under `<prefix>_<operation>` names.
pub struct CloudToolProtocol {
    toolset: Arc<dyn ProviderToolSet>,
    protocol_name: String,
}

impl CloudToolProtocol {
    pub fn new(toolset: Arc<dyn ProviderToolSet>) -> Self {
        let protocol_name = format!("cloud-{}", toolset.provider().tool_prefix());
        CloudToolProtocol {
            toolset,
            protocol_name,
        }
    }

    fn vm_param_key(&self) -> &'static str {
        match self.toolset.provider() {
            CloudProvider::Aws => "instance_id",
            CloudProvider::Azure => "vm_name",
            CloudProvider::Gcp => "instance_name",
            CloudProvider::IbmCloud => "instance_name",
        }
    }
}

#[async_trait]
impl ToolProtocol for CloudToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let prefix = format!("{}_", self.toolset.provider().tool_prefix());
        let operation = tool_name.strip_prefix(&prefix).ok_or_else(|| {
            Box::new(ToolError::NotFound(tool_name.to_string())) as Box<dyn Error + Send + Sync>
        })?;
        let vm_key = self.vm_param_key();

        match operation {
            "list_vms" => {
                let names = self.toolset.list_vms().await?;
                Ok(ToolResult::success(Value::from(names)))
            }
            "start_vm" => {
                let instance = require_str(&parameters, tool_name, vm_key)?;
                Ok(ToolResult::text(self.toolset.start_vm(instance).await?))
            }
            "stop_vm" => {
                let instance = require_str(&parameters, tool_name, vm_key)?;
                Ok(ToolResult::text(self.toolset.stop_vm(instance).await?))
            }
            "list_buckets" => {
                let account = parameters.get("account_name").and_then(|v| v.as_str());
                let names = self.toolset.list_buckets(account).await?;
                Ok(ToolResult::success(Value::from(names)))
            }
            "create_bucket" => {
                let bucket = require_str(&parameters, tool_name, "bucket_name")?;
                let account = parameters.get("account_name").and_then(|v| v.as_str());
                Ok(ToolResult::text(
                    self.toolset.create_bucket(bucket, account).await?,
                ))
            }
            "upload_file_to_bucket" => {
                let file_path = require_str(&parameters, tool_name, "file_path")?;
                let bucket = require_str(&parameters, tool_name, "bucket_name")?;
                let account = parameters.get("account_name").and_then(|v| v.as_str());
                let object_name = parameters
                    .get("object_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| file_basename(file_path));
                match self
                    .toolset
                    .upload_file_to_bucket(file_path, bucket, &object_name, account)
                    .await
                {
                    Ok(message) => Ok(ToolResult::text(message)),
                    Err(err) => {
                        log::warn!(
                            "{}: upload of '{}' failed: {}",
                            self.protocol_name,
                            object_name,
                            err
                        );
                        Ok(ToolResult::text(format!(
                            "File '{}' upload failed.",
                            object_name
                        )))
                    }
                }
            }
            "list_vm_cpu_usage" if self.toolset.supports_cpu_usage() => {
                let instance = require_str(&parameters, tool_name, vm_key)?;
                let minutes = require_u64(&parameters, tool_name, "n")?;
                Ok(ToolResult::text(
                    self.toolset.list_vm_cpu_usage(instance, minutes).await?,
                ))
            }
            _ => Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
        }
    }

    fn list_tools(&self) -> Vec<ToolMetadata> {
        let provider = self.toolset.provider();
        let prefix = provider.tool_prefix();
        let display = provider.display_name();
        let vm_key = self.vm_param_key();
        let vm_param = || {
            ToolParameter::new(vm_key, ToolParameterType::String)
                .with_description("Identifier of the virtual machine")
                .required()
        };
        let account_param = || {
            ToolParameter::new("account_name", ToolParameterType::String)
                .with_description("Storage account holding the container")
                .required()
        };

        let mut create_bucket = ToolMetadata::new(
            format!("{}_create_bucket", prefix),
            format!("Create a new object storage bucket on {}.", display),
        )
        .with_parameter(
            ToolParameter::new("bucket_name", ToolParameterType::String)
                .with_description("Name of the bucket to create")
                .required(),
        );
        let mut upload = ToolMetadata::new(
            format!("{}_upload_file_to_bucket", prefix),
            format!("Upload a local file to an object storage bucket on {}.", display),
        )
        .with_parameter(
            ToolParameter::new("file_path", ToolParameterType::String)
                .with_description("Path of the local file to upload")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("bucket_name", ToolParameterType::String)
                .with_description("Destination bucket")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("object_name", ToolParameterType::String)
                .with_description("Target object name, defaults to the file's basename"),
        );
        let mut list_buckets = ToolMetadata::new(
            format!("{}_list_buckets", prefix),
            format!("List object storage buckets on {}.", display),
        );
        if provider == CloudProvider::Azure {
            create_bucket = create_bucket.with_parameter(account_param());
            upload = upload.with_parameter(account_param());
            list_buckets = ToolMetadata::new(
                format!("{}_list_buckets", prefix),
                format!("List blob containers in a storage account on {}.", display),
            )
            .with_parameter(
                ToolParameter::new("account_name", ToolParameterType::String)
                    .with_description(
                        "Storage account to list containers in; omit to list account names",
                    ),
            );
        }

        let mut tools = vec![
            ToolMetadata::new(
                format!("{}_list_vms", prefix),
                format!("List names of running virtual machines on {}.", display),
            ),
            ToolMetadata::new(
                format!("{}_start_vm", prefix),
                format!("Start a virtual machine on {}.", display),
            )
            .with_parameter(vm_param()),
            ToolMetadata::new(
                format!("{}_stop_vm", prefix),
                format!("Stop a virtual machine on {}.", display),
            )
            .with_parameter(vm_param()),
            list_buckets,
            create_bucket,
            upload,
        ];
        if self.toolset.supports_cpu_usage() {
            tools.push(
                ToolMetadata::new(
                    format!("{}_list_vm_cpu_usage", prefix),
                    format!(
                        "Average CPU usage of a {} virtual machine over the past n minutes.",
                        display
                    ),
                )
                .with_parameter(vm_param())
                .with_parameter(
                    ToolParameter::new("n", ToolParameterType::Number)
                        .with_description("Lookback window in minutes")
                        .required(),
                ),
            );
        }
        tools
    }

    fn protocol_name(&self) -> &str {
        &self.protocol_name
    }
}

/// Owns one tool set per provider, injected into every consumer instead of
/// living behind process-wide globals.
pub struct CloudRegistry {
    toolsets: HashMap<CloudProvider, Arc<dyn ProviderToolSet>>,
}

impl CloudRegistry {
    /// Construct tool sets for all four providers. Construction is cheap and
    /// performs no network I/O; authenticated clients are built on first use.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut toolsets: HashMap<CloudProvider, Arc<dyn ProviderToolSet>> = HashMap::new();
        toolsets.insert(
            CloudProvider::Aws,
            Arc::new(aws::AwsToolSet::new(settings.aws.clone())),
        );
        toolsets.insert(
            CloudProvider::Azure,
            Arc::new(azure::AzureToolSet::new(settings.azure.clone())),
        );
        toolsets.insert(
            CloudProvider::Gcp,
            Arc::new(gcp::GcpToolSet::new(settings.gcp.clone())),
        );
        toolsets.insert(
            CloudProvider::IbmCloud,
            Arc::new(ibm::IbmToolSet::new(settings.ibm.clone())),
        );
        CloudRegistry { toolsets }
    }

    /// Build a registry from pre-constructed tool sets. Used by tests and any
    /// embedder wanting to substitute providers.
    pub fn from_toolsets(toolsets: Vec<Arc<dyn ProviderToolSet>>) -> Self {
        CloudRegistry {
            toolsets: toolsets.into_iter().map(|t| (t.provider(), t)).collect(),
        }
    }

    pub fn toolset(&self, provider: CloudProvider) -> Option<Arc<dyn ProviderToolSet>> {
        self.toolsets.get(&provider).map(Arc::clone)
    }

    /// Tool sets for the requested providers, preserving request order and
    /// skipping providers this registry does not carry.
    pub fn toolsets_for(&self, providers: &[CloudProvider]) -> Vec<Arc<dyn ProviderToolSet>> {
        providers
            .iter()
            .filter_map(|p| self.toolset(*p))
            .collect()
    }

    /// One agent-facing protocol per requested provider.
    pub fn protocols_for(&self, providers: &[CloudProvider]) -> Vec<Arc<CloudToolProtocol>> {
        self.toolsets_for(providers)
            .into_iter()
            .map(|t| Arc::new(CloudToolProtocol::new(t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex as AsyncMutex;

    /// Records the account each bucket listing was scoped to.
    struct RecordingToolSet {
        provider: CloudProvider,
        accounts_seen: AsyncMutex<Vec<Option<String>>>,
    }

    impl RecordingToolSet {
        fn new(provider: CloudProvider) -> Self {
            RecordingToolSet {
                provider,
                accounts_seen: AsyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderToolSet for RecordingToolSet {
        fn provider(&self) -> CloudProvider {
            self.provider
        }

        async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn start_vm(&self, _: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn stop_vm(&self, _: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn list_buckets(
            &self,
            account: Option<&str>,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            self.accounts_seen
                .lock()
                .await
                .push(account.map(|a| a.to_string()));
            Ok(vec!["docs".to_string()])
        }

        async fn create_bucket(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn upload_file_to_bucket(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn list_vm_cpu_usage(
            &self,
            _: &str,
            _: u64,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn bucket_listing_forwards_the_account_scope() {
        let toolset = Arc::new(RecordingToolSet::new(CloudProvider::Azure));
        let protocol = CloudToolProtocol::new(Arc::clone(&toolset) as Arc<dyn ProviderToolSet>);

        let result = protocol
            .execute("azure_list_buckets", json!({"account_name": "prodstore"}))
            .await
            .unwrap();
        assert!(result.success);
        protocol
            .execute("azure_list_buckets", json!({}))
            .await
            .unwrap();

        let seen = toolset.accounts_seen.lock().await;
        assert_eq!(
            *seen,
            vec![Some("prodstore".to_string()), None]
        );
    }

    #[test]
    fn azure_bucket_listing_advertises_an_optional_account() {
        let protocol = CloudToolProtocol::new(Arc::new(RecordingToolSet::new(
            CloudProvider::Azure,
        )) as Arc<dyn ProviderToolSet>);
        let tools = protocol.list_tools();
        let listing = tools
            .iter()
            .find(|t| t.name == "azure_list_buckets")
            .unwrap();
        let account = listing
            .parameters
            .iter()
            .find(|p| p.name == "account_name")
            .unwrap();
        assert!(!account.required);

        let aws = CloudToolProtocol::new(Arc::new(RecordingToolSet::new(CloudProvider::Aws))
            as Arc<dyn ProviderToolSet>);
        let tools = aws.list_tools();
        let listing = tools.iter().find(|t| t.name == "aws_list_buckets").unwrap();
        assert!(listing.parameters.is_empty());
    }

    #[test]
    fn mean_of_empty_set_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn basename_falls_back_to_input() {
        assert_eq!(file_basename("/tmp/report.pdf"), "report.pdf");
        assert_eq!(file_basename("report.pdf"), "report.pdf");
    }
}
