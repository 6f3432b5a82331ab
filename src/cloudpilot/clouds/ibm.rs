//! IBM Cloud tool set: VPC compute and Cloud Object Storage.
//!
//! IBM is the one provider with a recovery path for expired credentials: VPC
//! operations run through [`IbmToolSet::with_vpc`] and COS operations through
//! [`IbmToolSet::with_cos`]; on a 401/403 these reset the cached client,
//! rebuild it through the injected factory, and retry the operation exactly
//! once. A second auth failure propagates.
//!
//! The factories are trait objects so tests can count rebuilds and script
//! failures without a network.

use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::cloudpilot::config::IbmSettings;
use crate::cloudpilot::provider::CloudProvider;

use super::aws::parse_bucket_names;
use super::registry::ClientSlot;
use super::{CloudApiError, ProviderToolSet};

const VPC_API_VERSION: &str = "2024-04-30";
pub(crate) const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// One VPC compute instance as returned by the instances listing.
#[derive(Debug, Clone)]
pub struct VpcInstance {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// VPC compute operations the tool set needs.
#[async_trait]
pub trait VpcApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<VpcInstance>, CloudApiError>;
    async fn create_instance_action(
        &self,
        instance_id: &str,
        action: &str,
    ) -> Result<(), CloudApiError>;
}

/// Cloud Object Storage operations the tool set needs.
#[async_trait]
pub trait CosApi: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>, CloudApiError>;
    async fn create_bucket(&self, name: &str) -> Result<(), CloudApiError>;
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        body: Vec<u8>,
    ) -> Result<(), CloudApiError>;
}

/// Builds fresh VPC clients; invoked on first use and again after a reset.
#[async_trait]
pub trait VpcClientFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn VpcApi>, Box<dyn Error + Send + Sync>>;
}

#[async_trait]
pub trait CosClientFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn CosApi>, Box<dyn Error + Send + Sync>>;
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// IAM apikey-to-bearer-token exchange, cached until near expiry.
pub(crate) struct IamTokenSource {
    http: reqwest::Client,
    api_key: String,
    token: Mutex<Option<CachedToken>>,
}

impl IamTokenSource {
    pub(crate) fn new(http: reqwest::Client, api_key: String) -> Self {
        IamTokenSource {
            http,
            api_key,
            token: Mutex::new(None),
        }
    }

    pub(crate) async fn token(&self) -> Result<String, CloudApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() + chrono::Duration::seconds(60) < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }
        let params = [
            ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
            ("apikey", self.api_key.as_str()),
        ];
        let response = self
            .http
            .post(IAM_TOKEN_URL)
            .timeout(Duration::from_secs(10))
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let detail = body["errorMessage"].as_str().unwrap_or("IAM token request failed");
            return Err(CloudApiError::new(Some(status.as_u16()), detail));
        }
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| CloudApiError::new(None, "IAM response missing access_token"))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        });
        Ok(access_token)
    }
}

/// Real VPC client against `{region}.iaas.cloud.ibm.com`.
struct IbmVpcClient {
    http: reqwest::Client,
    tokens: IamTokenSource,
    base_url: String,
    vpc_id: Option<String>,
}

/// Instances listing path, scoped to one VPC when an id is configured.
fn instances_path(vpc_id: Option<&str>) -> String {
    match vpc_id {
        Some(id) => format!("/instances?vpc.id={}", id),
        None => "/instances".to_string(),
    }
}

impl IbmVpcClient {
    fn build(settings: &IbmSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = settings.api_key.clone().ok_or("IBM_API_KEY is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(IbmVpcClient {
            tokens: IamTokenSource::new(http.clone(), api_key),
            base_url: format!("https://{}.iaas.cloud.ibm.com/v1", settings.region),
            vpc_id: settings.vpc_instance_id.clone(),
            http,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CloudApiError> {
        let token = self.tokens.token().await?;
        let separator = if path.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}{}version={}&generation=2",
            self.base_url, path, separator, VPC_API_VERSION
        );
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
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
}

#[async_trait]
impl VpcApi for IbmVpcClient {
    async fn list_instances(&self) -> Result<Vec<VpcInstance>, CloudApiError> {
        let path = instances_path(self.vpc_id.as_deref());
        let json = self.request(reqwest::Method::GET, &path, None).await?;
        Ok(json["instances"]
            .as_array()
            .map(|instances| {
                instances
                    .iter()
                    .filter_map(|instance| {
                        Some(VpcInstance {
                            id: instance["id"].as_str()?.to_string(),
                            name: instance["name"].as_str()?.to_string(),
                            status: instance["status"].as_str().unwrap_or("").to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_instance_action(
        &self,
        instance_id: &str,
        action: &str,
    ) -> Result<(), CloudApiError> {
        let path = format!("/instances/{}/actions", instance_id);
        self.request(
            reqwest::Method::POST,
            &path,
            Some(json!({ "type": action })),
        )
        .await?;
        Ok(())
    }
}

/// Real COS client against the regional S3-compatible endpoint, using IAM
/// bearer auth instead of SigV4.
struct IbmCosClient {
    http: reqwest::Client,
    tokens: IamTokenSource,
    base_url: String,
}

impl IbmCosClient {
    fn build(settings: &IbmSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = settings.api_key.clone().ok_or("IBM_API_KEY is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(IbmCosClient {
            tokens: IamTokenSource::new(http.clone(), api_key),
            base_url: format!(
                "https://s3.{}.cloud-object-storage.appdomain.cloud",
                settings.region
            ),
            http,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<String, CloudApiError> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(CloudApiError::new(Some(status.as_u16()), text))
        }
    }
}

#[async_trait]
impl CosApi for IbmCosClient {
    async fn list_buckets(&self) -> Result<Vec<String>, CloudApiError> {
        let xml = self.request(reqwest::Method::GET, "/", Vec::new()).await?;
        Ok(parse_bucket_names(&xml))
    }

    async fn create_bucket(&self, name: &str) -> Result<(), CloudApiError> {
        self.request(reqwest::Method::PUT, &format!("/{}", name), Vec::new())
            .await?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        body: Vec<u8>,
    ) -> Result<(), CloudApiError> {
        self.request(reqwest::Method::PUT, &format!("/{}/{}", bucket, object), body)
            .await?;
        Ok(())
    }
}

struct RealVpcFactory {
    settings: IbmSettings,
}

#[async_trait]
impl VpcClientFactory for RealVpcFactory {
    async fn build(&self) -> Result<Arc<dyn VpcApi>, Box<dyn Error + Send + Sync>> {
        Ok(Arc::new(IbmVpcClient::build(&self.settings)?))
    }
}

struct RealCosFactory {
    settings: IbmSettings,
}

#[async_trait]
impl CosClientFactory for RealCosFactory {
    async fn build(&self) -> Result<Arc<dyn CosApi>, Box<dyn Error + Send + Sync>> {
        Ok(Arc::new(IbmCosClient::build(&self.settings)?))
    }
}

type VpcOpFuture<T> = Pin<Box<dyn Future<Output = Result<T, CloudApiError>> + Send>>;
type CosOpFuture<T> = Pin<Box<dyn Future<Output = Result<T, CloudApiError>> + Send>>;

pub struct IbmToolSet {
    vpc_factory: Arc<dyn VpcClientFactory>,
    cos_factory: Arc<dyn CosClientFactory>,
    vpc: ClientSlot<dyn VpcApi>,
    cos: ClientSlot<dyn CosApi>,
}

impl IbmToolSet {
    pub fn new(settings: IbmSettings) -> Self {
        Self::with_factories(
            Arc::new(RealVpcFactory {
                settings: settings.clone(),
            }),
            Arc::new(RealCosFactory { settings }),
        )
    }

    /// Inject factories directly; the seam the retry tests use.
    pub fn with_factories(
        vpc_factory: Arc<dyn VpcClientFactory>,
        cos_factory: Arc<dyn CosClientFactory>,
    ) -> Self {
        IbmToolSet {
            vpc_factory,
            cos_factory,
            vpc: ClientSlot::empty(),
            cos: ClientSlot::empty(),
        }
    }

    async fn vpc_client(&self) -> Result<Arc<dyn VpcApi>, Box<dyn Error + Send + Sync>> {
        let factory = Arc::clone(&self.vpc_factory);
        self.vpc.get_or_init(move || async move { factory.build().await }).await
    }

    async fn cos_client(&self) -> Result<Arc<dyn CosApi>, Box<dyn Error + Send + Sync>> {
        let factory = Arc::clone(&self.cos_factory);
        self.cos.get_or_init(move || async move { factory.build().await }).await
    }

    /// Run a VPC operation; on a 401/403 reset the cached client, rebuild it
    /// and retry exactly once. Any second failure propagates.
    async fn with_vpc<T, F>(&self, op: F) -> Result<T, Box<dyn Error + Send + Sync>>
    where
        F: Fn(Arc<dyn VpcApi>) -> VpcOpFuture<T>,
    {
        let client = self.vpc_client().await?;
        match op(client).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth_failure() => {
                log::warn!("IBM VPC auth failure ({}), rebuilding client and retrying", err);
                self.vpc.reset().await;
                let client = self.vpc_client().await?;
                op(client).await.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            }
            Err(err) => Err(Box::new(err) as Box<dyn Error + Send + Sync>),
        }
    }

    /// COS twin of [`IbmToolSet::with_vpc`]: 401/403 resets the cached COS
    /// client, rebuilds it and retries the operation exactly once.
    async fn with_cos<T, F>(&self, op: F) -> Result<T, Box<dyn Error + Send + Sync>>
    where
        F: Fn(Arc<dyn CosApi>) -> CosOpFuture<T>,
    {
        let client = self.cos_client().await?;
        match op(client).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth_failure() => {
                log::warn!("IBM COS auth failure ({}), rebuilding client and retrying", err);
                self.cos.reset().await;
                let client = self.cos_client().await?;
                op(client).await.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            }
            Err(err) => Err(Box::new(err) as Box<dyn Error + Send + Sync>),
        }
    }

    async fn vm_action(
        &self,
        instance: &str,
        action: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let name = instance.to_string();
        let action_owned = action.to_string();
        let found = self
            .with_vpc(move |client| {
                let name = name.clone();
                let action = action_owned.clone();
                Box::pin(async move {
                    let instances = client.list_instances().await?;
                    match instances.into_iter().find(|i| i.name == name) {
                        Some(instance) => {
                            client.create_instance_action(&instance.id, &action).await?;
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                })
            })
            .await?;
        if !found {
            return Ok(format!("VM {} not found.", instance));
        }
        let verb = if action == "start" { "started" } else { "stopped" };
        Ok(format!("VM {} {}.", instance, verb))
    }
}

#[async_trait]
impl ProviderToolSet for IbmToolSet {
    fn provider(&self) -> CloudProvider {
        CloudProvider::IbmCloud
    }

    async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        self.with_vpc(|client| {
            Box::pin(async move {
                let instances = client.list_instances().await?;
                Ok(instances
                    .into_iter()
                    .filter(|i| i.status == "running")
                    .map(|i| i.name)
                    .collect())
            })
        })
        .await
    }

    async fn start_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.vm_action(instance, "start").await
    }

    async fn stop_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.vm_action(instance, "stop").await
    }

    async fn list_buckets(
        &self,
        _account: Option<&str>,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        self.with_cos(|client| Box::pin(async move { client.list_buckets().await }))
            .await
    }

    async fn create_bucket(
        &self,
        name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let name_owned = name.to_string();
        self.with_cos(move |client| {
            let name = name_owned.clone();
            Box::pin(async move { client.create_bucket(&name).await })
        })
        .await?;
        Ok(format!("COS bucket {} created.", name))
    }

    async fn upload_file_to_bucket(
        &self,
        file_path: &str,
        bucket: &str,
        object_name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let body = tokio::fs::read(file_path).await?;
        let bucket_owned = bucket.to_string();
        let object_owned = object_name.to_string();
        self.with_cos(move |client| {
            let bucket = bucket_owned.clone();
            let object = object_owned.clone();
            let body = body.clone();
            Box::pin(async move { client.put_object(&bucket, &object, body).await })
        })
        .await?;
        Ok(format!(
            "File '{}' uploaded to bucket '{}'.",
            object_name, bucket
        ))
    }

    /// IBM's catalog has no CPU-usage operation.
    fn supports_cpu_usage(&self) -> bool {
        false
    }

    async fn list_vm_cpu_usage(
        &self,
        _instance: &str,
        _minutes: u64,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        Err("CPU usage is not available for IBM Cloud".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_listing_is_scoped_when_a_vpc_id_is_configured() {
        assert_eq!(
            instances_path(Some("r006-0fe9e5c8")),
            "/instances?vpc.id=r006-0fe9e5c8"
        );
    }

    #[test]
    fn instances_listing_is_unscoped_without_a_vpc_id() {
        assert_eq!(instances_path(None), "/instances");
    }
}
