//! Azure tool set over the ARM REST surface.
//!
//! Authentication is an OAuth2 client-credentials exchange against the tenant's
//! token endpoint, cached per scope until shortly before expiry. Management
//! calls use the ARM scope; blob uploads use the storage data-plane scope.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cloudpilot::config::AzureSettings;
use crate::cloudpilot::provider::CloudProvider;

use super::registry::ClientSlot;
use super::{mean, CloudApiError, ProviderToolSet};

const ARM_BASE: &str = "https://management.azure.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
const COMPUTE_API_VERSION: &str = "2023-07-01";
const STORAGE_API_VERSION: &str = "2023-01-01";
const METRICS_API_VERSION: &str = "2018-01-01";

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// 60s buffer so a token is never used right at its expiry edge.
    fn is_expired(&self) -> bool {
        Utc::now() + chrono::Duration::seconds(60) >= self.expires_at
    }
}

/// Authenticated ARM handle: service-principal credentials plus a per-scope
/// token cache shared by the compute/storage/monitoring slots.
pub struct AzureApiClient {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    subscription_id: String,
    resource_group: String,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl AzureApiClient {
    fn build(settings: &AzureSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let tenant_id = settings.tenant_id.clone().ok_or("AZURE_TENANT_ID is not set")?;
        let client_id = settings.client_id.clone().ok_or("AZURE_CLIENT_ID is not set")?;
        let client_secret = settings
            .client_secret
            .clone()
            .ok_or("AZURE_CLIENT_SECRET is not set")?;
        let subscription_id = settings
            .subscription_id
            .clone()
            .ok_or("AZURE_SUBSCRIPTION_ID is not set")?;
        let resource_group = settings
            .resource_group
            .clone()
            .ok_or("AZURE_RESOURCE_GROUP is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(AzureApiClient {
            http,
            tenant_id,
            client_id,
            client_secret,
            subscription_id,
            resource_group,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Client-credentials token exchange, bounded at 10s.
    async fn token(&self, scope: &str) -> Result<String, CloudApiError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(scope) {
            if !cached.is_expired() {
                return Ok(cached.access_token.clone());
            }
        }

        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self
            .http
            .post(&token_url)
            .timeout(Duration::from_secs(10))
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            let detail = json["error_description"]
                .as_str()
                .unwrap_or("token request failed");
            return Err(CloudApiError::new(Some(status.as_u16()), detail));
        }
        let access_token = json["access_token"]
            .as_str()
            .ok_or_else(|| CloudApiError::new(None, "token response missing access_token"))?
            .to_string();
        let expires_in = json["expires_in"].as_i64().unwrap_or(3600);
        tokens.insert(
            scope.to_string(),
            CachedToken {
                access_token: access_token.clone(),
                expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
            },
        );
        Ok(access_token)
    }

    async fn arm(&self, method: reqwest::Method, path: &str) -> Result<Value, CloudApiError> {
        let token = self.token(ARM_SCOPE).await?;
        let response = self
            .http
            .request(method, format!("{}{}", ARM_BASE, path))
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CloudApiError::new(Some(status.as_u16()), text));
        }
        if text.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text).map_err(|e| CloudApiError::new(None, e.to_string()))
        }
    }

    fn vm_path(&self, suffix: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines{}",
            self.subscription_id, self.resource_group, suffix
        )
    }
}

fn arm_resource_names(json: &Value) -> Vec<String> {
    json["value"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str().map(|n| n.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Per-minute averages out of an Azure Monitor metrics response.
fn metric_averages(json: &Value) -> Vec<f64> {
    json["value"]
        .as_array()
        .and_then(|metrics| metrics.first())
        .and_then(|metric| metric["timeseries"].as_array())
        .and_then(|series| series.first())
        .and_then(|serie| serie["data"].as_array())
        .map(|points| {
            points
                .iter()
                .filter_map(|point| point["average"].as_f64())
                .collect()
        })
        .unwrap_or_default()
}

pub struct AzureToolSet {
    settings: AzureSettings,
    client: ClientSlot<AzureApiClient>,
}

impl AzureToolSet {
    pub fn new(settings: AzureSettings) -> Self {
        AzureToolSet {
            settings,
            client: ClientSlot::empty(),
        }
    }

    async fn client(&self) -> Result<Arc<AzureApiClient>, Box<dyn Error + Send + Sync>> {
        let settings = self.settings.clone();
        self.client
            .get_or_init(|| async move { AzureApiClient::build(&settings).map(Arc::new) })
            .await
    }

    fn require_account(account: Option<&str>) -> Result<&str, Box<dyn Error + Send + Sync>> {
        account.ok_or_else(|| "account_name is required for Azure storage operations".into())
    }
}

#[async_trait]
impl ProviderToolSet for AzureToolSet {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client().await?;
        let path = format!(
            "{}?api-version={}",
            client.vm_path(""),
            COMPUTE_API_VERSION
        );
        let json = client.arm(reqwest::Method::GET, &path).await?;
        Ok(arm_resource_names(&json))
    }

    async fn start_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client().await?;
        let path = format!(
            "{}?api-version={}",
            client.vm_path(&format!("/{}/start", instance)),
            COMPUTE_API_VERSION
        );
        client.arm(reqwest::Method::POST, &path).await?;
        Ok(format!("Azure VM {} started.", instance))
    }

    async fn stop_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client().await?;
        // Deallocate rather than power off so compute charges stop too.
        let path = format!(
            "{}?api-version={}",
            client.vm_path(&format!("/{}/deallocate", instance)),
            COMPUTE_API_VERSION
        );
        client.arm(reqwest::Method::POST, &path).await?;
        Ok(format!("Azure VM {} stopped.", instance))
    }

    /// With an account, the blob containers in that account; without one,
    /// the subscription's storage account names (the cross-provider summary
    /// path, which has no account to scope by).
    async fn list_buckets(
        &self,
        account: Option<&str>,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client().await?;
        let path = match account {
            Some(account) => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}/blobServices/default/containers?api-version={}",
                client.subscription_id, client.resource_group, account, STORAGE_API_VERSION
            ),
            None => format!(
                "/subscriptions/{}/providers/Microsoft.Storage/storageAccounts?api-version={}",
                client.subscription_id, STORAGE_API_VERSION
            ),
        };
        let json = client.arm(reqwest::Method::GET, &path).await?;
        Ok(arm_resource_names(&json))
    }

    async fn create_bucket(
        &self,
        name: &str,
        account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let account = Self::require_account(account)?;
        let client = self.client().await?;
        let path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}/blobServices/default/containers/{}?api-version={}",
            client.subscription_id, client.resource_group, account, name, STORAGE_API_VERSION
        );
        client.arm(reqwest::Method::PUT, &path).await?;
        Ok(format!(
            "Blob container '{}' created in account '{}'.",
            name, account
        ))
    }

    async fn upload_file_to_bucket(
        &self,
        file_path: &str,
        bucket: &str,
        object_name: &str,
        account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let account = Self::require_account(account)?;
        let body = tokio::fs::read(file_path).await?;
        let client = self.client().await?;
        let token = client.token(STORAGE_SCOPE).await?;
        let url = format!(
            "https://{}.blob.core.windows.net/{}/{}",
            account, bucket, object_name
        );
        let response = client
            .http
            .put(&url)
            .bearer_auth(token)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", "2021-12-02")
            .body(body)
            .send()
            .await
            .map_err(CloudApiError::from)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Box::new(CloudApiError::new(Some(status.as_u16()), text)));
        }
        Ok(format!(
            "File '{}' uploaded to bucket '{}'.",
            object_name, bucket
        ))
    }

    async fn list_vm_cpu_usage(
        &self,
        instance: &str,
        minutes: u64,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client().await?;
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(minutes as i64);
        let path = format!(
            "{}/providers/microsoft.insights/metrics?api-version={}&metricnames=Percentage%20CPU&timespan={}/{}&interval=PT1M&aggregation=Average",
            client.vm_path(&format!("/{}", instance)),
            METRICS_API_VERSION,
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        let json = client.arm(reqwest::Method::GET, &path).await?;
        let averages = metric_averages(&json);
        Ok(match mean(&averages) {
            Some(avg) => format!("Average CPU usage for Azure VM {}: {:.2}%", instance, avg),
            None => format!("No CPU usage data found for Azure VM {}.", instance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_names_from_arm_listing() {
        let json = json!({"value": [{"name": "vm-a"}, {"name": "vm-b"}, {"id": "no-name"}]});
        assert_eq!(arm_resource_names(&json), vec!["vm-a", "vm-b"]);
        assert!(arm_resource_names(&json!({})).is_empty());
    }

    #[test]
    fn metric_averages_skip_gaps() {
        let json = json!({
            "value": [{
                "timeseries": [{
                    "data": [
                        {"timeStamp": "t0", "average": 10.0},
                        {"timeStamp": "t1"},
                        {"timeStamp": "t2", "average": 30.0}
                    ]
                }]
            }]
        });
        assert_eq!(metric_averages(&json), vec![10.0, 30.0]);
        assert!(metric_averages(&json!({"value": []})).is_empty());
    }

    #[test]
    fn expiry_buffer_trips_early() {
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(token.is_expired());
        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(600),
        };
        assert!(!fresh.is_expired());
    }
}
