//! Cross-provider resource summary with isolated failure domains.
//!
//! Providers are queried one after another; a failure contributes an
//! `{"error": ...}` entry for that provider only and never aborts the rest.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::cloudpilot::tool_protocol::{ToolMetadata, ToolProtocol, ToolResult};

use super::ProviderToolSet;

/// Summarize VMs and buckets across the given tool sets.
///
/// Output is keyed by each provider's fixed display name (`AWS`, `Azure`,
/// `GCP`, `IBMCloud`); providers not passed in are absent from the output.
pub async fn collect_cloud_resources(toolsets: &[Arc<dyn ProviderToolSet>]) -> Value {
    let mut summary = Map::new();
    for toolset in toolsets {
        let key = toolset.provider().display_name().to_string();
        let entry = match provider_summary(toolset.as_ref()).await {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("resource summary for {} failed: {}", key, err);
                json!({ "error": err.to_string() })
            }
        };
        summary.insert(key, entry);
    }
    Value::Object(summary)
}

async fn provider_summary(
    toolset: &dyn ProviderToolSet,
) -> Result<Value, Box<dyn Error + Send + Sync>> {
    let vms = toolset.list_vms().await?;
    let buckets = toolset.list_buckets(None).await?;
    Ok(json!({ "vms": vms, "buckets": buckets }))
}

/// Exposes the aggregator as an agent-callable tool.
pub struct AggregatorToolProtocol {
    toolsets: Vec<Arc<dyn ProviderToolSet>>,
}

impl AggregatorToolProtocol {
    pub fn new(toolsets: Vec<Arc<dyn ProviderToolSet>>) -> Self {
        AggregatorToolProtocol { toolsets }
    }
}

#[async_trait]
impl ToolProtocol for AggregatorToolProtocol {
    async fn execute(
        &self,
        _tool_name: &str,
        _parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        Ok(ToolResult::success(
            collect_cloud_resources(&self.toolsets).await,
        ))
    }

    fn list_tools(&self) -> Vec<ToolMetadata> {
        vec![ToolMetadata::new(
            "list_all_cloud_resources",
            "List virtual machines and storage buckets across all configured cloud providers.",
        )]
    }

    fn protocol_name(&self) -> &str {
        "cloud-aggregator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudpilot::provider::CloudProvider;

    struct FakeToolSet {
        provider: CloudProvider,
        vms: Result<Vec<String>, String>,
        buckets: Result<Vec<String>, String>,
    }

    impl FakeToolSet {
        fn healthy(provider: CloudProvider, vms: &[&str], buckets: &[&str]) -> Arc<Self> {
            Arc::new(FakeToolSet {
                provider,
                vms: Ok(vms.iter().map(|s| s.to_string()).collect()),
                buckets: Ok(buckets.iter().map(|s| s.to_string()).collect()),
            })
        }

        fn broken(provider: CloudProvider, message: &str) -> Arc<Self> {
            Arc::new(FakeToolSet {
                provider,
                vms: Err(message.to_string()),
                buckets: Err(message.to_string()),
            })
        }
    }

    #[async_trait]
    impl ProviderToolSet for FakeToolSet {
        fn provider(&self) -> CloudProvider {
            self.provider
        }

        async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            self.vms.clone().map_err(|e| e.into())
        }

        async fn start_vm(&self, _: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn stop_vm(&self, _: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            unimplemented!()
        }

        async fn list_buckets(
            &self,
            _account: Option<&str>,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            self.buckets.clone().map_err(|e| e.into())
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
    async fn one_broken_provider_does_not_poison_the_rest() {
        let toolsets: Vec<Arc<dyn ProviderToolSet>> = vec![
            FakeToolSet::healthy(CloudProvider::Aws, &["web-1"], &["logs"]),
            FakeToolSet::broken(CloudProvider::Azure, "credentials missing"),
            FakeToolSet::healthy(CloudProvider::Gcp, &[], &["assets"]),
        ];
        let summary = collect_cloud_resources(&toolsets).await;

        assert_eq!(summary["AWS"]["vms"], json!(["web-1"]));
        assert_eq!(summary["AWS"]["buckets"], json!(["logs"]));
        assert_eq!(
            summary["Azure"]["error"].as_str(),
            Some("credentials missing")
        );
        assert_eq!(summary["GCP"]["vms"], json!([]));
        assert_eq!(summary["GCP"]["buckets"], json!(["assets"]));
    }

    #[tokio::test]
    async fn unrequested_providers_are_absent() {
        let toolsets: Vec<Arc<dyn ProviderToolSet>> =
            vec![FakeToolSet::healthy(CloudProvider::IbmCloud, &[], &[])];
        let summary = collect_cloud_resources(&toolsets).await;

        assert!(summary.get("IBMCloud").is_some());
        assert!(summary.get("AWS").is_none());
        assert_eq!(summary.as_object().map(|m| m.len()), Some(1));
    }
}
