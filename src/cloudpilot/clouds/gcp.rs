//! GCP tool set over the `{service}.googleapis.com` REST surfaces with a
//! pre-issued bearer token from configuration.
//!
//! Monitoring reports CPU utilization as a 0..1 fraction; it is rescaled by
//! 100 here so all four providers report percentages.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::cloudpilot::config::GcpSettings;
use crate::cloudpilot::provider::CloudProvider;

use super::registry::ClientSlot;
use super::sigv4::uri_encode;
use super::{mean, CloudApiError, ProviderToolSet};

/// Bearer-authenticated handle to one googleapis.com service.
pub struct GcpApiClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    project_id: String,
    zone: String,
}

impl GcpApiClient {
    fn build(settings: &GcpSettings, service: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let project_id = settings
            .project_id
            .clone()
            .ok_or("GCP_PROJECT_ID is not set")?;
        let access_token = settings
            .access_token
            .clone()
            .ok_or("GCP_ACCESS_TOKEN is not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(GcpApiClient {
            http,
            base_url: format!("https://{}.googleapis.com", service),
            access_token,
            project_id,
            zone: settings.zone.clone(),
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CloudApiError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token);
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

fn running_instance_names(json: &Value) -> Vec<String> {
    json["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item["status"].as_str() == Some("RUNNING"))
                .filter_map(|item| item["name"].as_str().map(|n| n.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn item_names(json: &Value) -> Vec<String> {
    json["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str().map(|n| n.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Raw utilization fractions out of a Monitoring timeSeries response.
fn utilization_fractions(json: &Value) -> Vec<f64> {
    json["timeSeries"]
        .as_array()
        .map(|series| {
            series
                .iter()
                .filter_map(|serie| serie["points"].as_array())
                .flatten()
                .filter_map(|point| point["value"]["doubleValue"].as_f64())
                .collect()
        })
        .unwrap_or_default()
}

pub struct GcpToolSet {
    settings: GcpSettings,
    compute: ClientSlot<GcpApiClient>,
    storage: ClientSlot<GcpApiClient>,
    monitoring: ClientSlot<GcpApiClient>,
}

impl GcpToolSet {
    pub fn new(settings: GcpSettings) -> Self {
        GcpToolSet {
            settings,
            compute: ClientSlot::empty(),
            storage: ClientSlot::empty(),
            monitoring: ClientSlot::empty(),
        }
    }

    async fn client(
        &self,
        slot: &ClientSlot<GcpApiClient>,
        service: &str,
    ) -> Result<Arc<GcpApiClient>, Box<dyn Error + Send + Sync>> {
        let settings = self.settings.clone();
        let service = service.to_string();
        slot.get_or_init(|| async move { GcpApiClient::build(&settings, &service).map(Arc::new) })
            .await
    }

    async fn instance_action(
        &self,
        instance: &str,
        action: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.compute, "compute").await?;
        let path = format!(
            "/compute/v1/projects/{}/zones/{}/instances/{}/{}",
            client.project_id, client.zone, instance, action
        );
        let json = client.request(reqwest::Method::POST, &path, None).await?;
        let operation = json["name"].as_str().unwrap_or("unknown");
        let verb = if action == "start" { "started" } else { "stopped" };
        Ok(format!("VM {} {} (operation: {}).", instance, verb, operation))
    }
}

#[async_trait]
impl ProviderToolSet for GcpToolSet {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.compute, "compute").await?;
        let path = format!(
            "/compute/v1/projects/{}/zones/{}/instances",
            client.project_id, client.zone
        );
        let json = client.request(reqwest::Method::GET, &path, None).await?;
        Ok(running_instance_names(&json))
    }

    async fn start_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.instance_action(instance, "start").await
    }

    async fn stop_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.instance_action(instance, "stop").await
    }

    async fn list_buckets(
        &self,
        _account: Option<&str>,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.storage, "storage").await?;
        let path = format!("/storage/v1/b?project={}", client.project_id);
        let json = client.request(reqwest::Method::GET, &path, None).await?;
        Ok(item_names(&json))
    }

    async fn create_bucket(
        &self,
        name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.storage, "storage").await?;
        let path = format!("/storage/v1/b?project={}", client.project_id);
        client
            .request(reqwest::Method::POST, &path, Some(json!({ "name": name })))
            .await?;
        Ok(format!("GCS bucket {} created.", name))
    }

    async fn upload_file_to_bucket(
        &self,
        file_path: &str,
        bucket: &str,
        object_name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let body = tokio::fs::read(file_path).await?;
        let client = self.client(&self.storage, "storage").await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            client.base_url,
            uri_encode(bucket),
            uri_encode(object_name)
        );
        let response = client
            .http
            .post(&url)
            .bearer_auth(&client.access_token)
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
        let client = self.client(&self.monitoring, "monitoring").await?;
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(minutes as i64);
        let filter = format!(
            "metric.type=\"compute.googleapis.com/instance/cpu/utilization\" AND metric.labels.instance_name=\"{}\"",
            instance
        );
        let path = format!(
            "/v3/projects/{}/timeSeries?filter={}&interval.startTime={}&interval.endTime={}",
            client.project_id,
            uri_encode(&filter),
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        let json = client.request(reqwest::Method::GET, &path, None).await?;
        let fractions = utilization_fractions(&json);
        Ok(match mean(&fractions) {
            // Monitoring reports a fraction; rescale to a percentage.
            Some(avg) => format!("Average CPU usage for {}: {:.2}%", instance, avg * 100.0),
            None => format!("No CPU usage data found for {}.", instance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_instances_are_listed() {
        let json = json!({
            "items": [
                {"name": "vm-a", "status": "RUNNING"},
                {"name": "vm-b", "status": "TERMINATED"},
                {"name": "vm-c", "status": "RUNNING"}
            ]
        });
        assert_eq!(running_instance_names(&json), vec!["vm-a", "vm-c"]);
        assert!(running_instance_names(&json!({})).is_empty());
    }

    #[test]
    fn fractions_flatten_across_series() {
        let json = json!({
            "timeSeries": [
                {"points": [{"value": {"doubleValue": 0.42}}, {"value": {"doubleValue": 0.40}}]},
                {"points": [{"value": {"doubleValue": 0.44}}]}
            ]
        });
        assert_eq!(utilization_fractions(&json), vec![0.42, 0.40, 0.44]);
    }

    #[test]
    fn fraction_rescaling_formats_as_percentage() {
        let avg = mean(&[0.42]).unwrap() * 100.0;
        assert_eq!(format!("{:.2}%", avg), "42.00%");
    }
}
