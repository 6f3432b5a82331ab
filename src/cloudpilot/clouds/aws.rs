//! AWS tool set: EC2, S3 and CloudWatch over the Query/REST APIs with SigV4
//! signing.
//!
//! EC2 and CloudWatch speak the form-encoded Query protocol and answer XML;
//! the few fields needed are pulled out with small substring helpers rather
//! than a full XML parser. S3 uses its REST surface directly.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::cloudpilot::config::AwsSettings;
use crate::cloudpilot::provider::CloudProvider;

use super::registry::ClientSlot;
use super::sigv4::{uri_encode, SigV4Signer};
use super::{mean, CloudApiError, ProviderToolSet};

const EC2_API_VERSION: &str = "2016-11-15";
const CLOUDWATCH_API_VERSION: &str = "2010-08-01";

/// Text of the first `<tag>...</tag>` occurrence.
fn xml_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Text of every `<tag>...</tag>` occurrence, in document order.
fn xml_text_all<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = xml[pos..].find(&open) {
        let start = pos + rel + open.len();
        match xml[start..].find(&close) {
            Some(len) => {
                out.push(&xml[start..start + len]);
                pos = start + len + close.len();
            }
            None => break,
        }
    }
    out
}

/// Inner content of each outermost `<tag>` block, skipping blocks nested
/// inside another block of the same tag (EC2 nests `<item>` heavily).
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = xml[pos..].find(&open) {
        let content_start = pos + rel + open.len();
        let mut depth = 1usize;
        let mut cursor = content_start;
        loop {
            let next_close = match xml[cursor..].find(&close) {
                Some(c) => c,
                None => return out,
            };
            match xml[cursor..].find(&open) {
                Some(o) if o < next_close => {
                    depth += 1;
                    cursor += o + open.len();
                }
                _ => {
                    depth -= 1;
                    let close_abs = cursor + next_close;
                    if depth == 0 {
                        out.push(&xml[content_start..close_abs]);
                        pos = close_abs + close.len();
                        break;
                    }
                    cursor = close_abs + close.len();
                }
            }
        }
    }
    out
}

/// Running-instance names from a DescribeInstances response: the `Name` tag
/// when present, the instance id otherwise.
fn parse_instance_names(xml: &str) -> Vec<String> {
    let mut names = Vec::new();
    for instances_set in xml_text_all(xml, "instancesSet") {
        for instance in xml_blocks(instances_set, "item") {
            let instance_id = xml_text(instance, "instanceId").unwrap_or("");
            let mut name = None;
            if let Some(tag_set) = xml_text(instance, "tagSet") {
                for tag in xml_blocks(tag_set, "item") {
                    if xml_text(tag, "key") == Some("Name") {
                        name = xml_text(tag, "value").map(|v| v.to_string());
                    }
                }
            }
            names.push(name.unwrap_or_else(|| instance_id.to_string()));
        }
    }
    names
}

/// Shared with the IBM COS tool set, whose listing API speaks the same XML.
pub(crate) fn parse_bucket_names(xml: &str) -> Vec<String> {
    xml_blocks(xml, "Bucket")
        .iter()
        .filter_map(|block| xml_text(block, "Name").map(|n| n.to_string()))
        .collect()
}

fn parse_datapoint_averages(xml: &str) -> Vec<f64> {
    xml_text_all(xml, "Average")
        .iter()
        .filter_map(|v| v.parse().ok())
        .collect()
}

/// Signed HTTP handle to one AWS service endpoint in one region.
pub struct AwsApiClient {
    http: reqwest::Client,
    signer: SigV4Signer,
    endpoint: Url,
}

impl AwsApiClient {
    fn build(settings: &AwsSettings, service: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let access_key = settings
            .access_key_id
            .clone()
            .ok_or("AWS_ACCESS_KEY_ID is not set")?;
        let secret_key = settings
            .secret_access_key
            .clone()
            .ok_or("AWS_SECRET_ACCESS_KEY is not set")?;
        let endpoint = Url::parse(&format!(
            "https://{}.{}.amazonaws.com/",
            service, settings.region
        ))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(AwsApiClient {
            http,
            signer: SigV4Signer::new(access_key, secret_key, settings.region.clone(), service),
            endpoint,
        })
    }

    /// Form-encoded Query-protocol call (EC2, CloudWatch). Returns raw XML.
    async fn query(
        &self,
        action: &str,
        version: &str,
        params: &[(String, String)],
    ) -> Result<String, CloudApiError> {
        let mut pairs = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), version.to_string()),
        ];
        pairs.extend_from_slice(params);
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let content_type = (
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );
        self.send("POST", self.endpoint.clone(), &[content_type], body.into_bytes())
            .await
    }

    /// REST call with a raw path (S3).
    async fn rest(
        &self,
        method: &str,
        path: &str,
        extra_headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<String, CloudApiError> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| CloudApiError::new(None, e.to_string()))?;
        self.send(method, url, extra_headers, body).await
    }

    async fn send(
        &self,
        method: &str,
        url: Url,
        extra_headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<String, CloudApiError> {
        let headers = self
            .signer
            .sign_request(method, &url, extra_headers, &body, Utc::now())
            .map_err(|e| CloudApiError::new(None, e.to_string()))?;

        let mut request = self.http.request(
            method
                .parse::<reqwest::Method>()
                .map_err(|e| CloudApiError::new(None, e.to_string()))?,
            url,
        );
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(CloudApiError::new(Some(status.as_u16()), text))
        }
    }
}

/// The AWS implementation of the uniform operation catalog.
pub struct AwsToolSet {
    settings: AwsSettings,
    ec2: ClientSlot<AwsApiClient>,
    s3: ClientSlot<AwsApiClient>,
    monitoring: ClientSlot<AwsApiClient>,
}

impl AwsToolSet {
    pub fn new(settings: AwsSettings) -> Self {
        AwsToolSet {
            settings,
            ec2: ClientSlot::empty(),
            s3: ClientSlot::empty(),
            monitoring: ClientSlot::empty(),
        }
    }

    async fn client(
        &self,
        slot: &ClientSlot<AwsApiClient>,
        service: &str,
    ) -> Result<Arc<AwsApiClient>, Box<dyn Error + Send + Sync>> {
        let settings = self.settings.clone();
        let service = service.to_string();
        slot.get_or_init(|| async move { AwsApiClient::build(&settings, &service).map(Arc::new) })
            .await
    }
}

#[async_trait]
impl ProviderToolSet for AwsToolSet {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn list_vms(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.ec2, "ec2").await?;
        let params = vec![
            ("Filter.1.Name".to_string(), "instance-state-name".to_string()),
            ("Filter.1.Value.1".to_string(), "running".to_string()),
        ];
        let xml = client
            .query("DescribeInstances", EC2_API_VERSION, &params)
            .await?;
        Ok(parse_instance_names(&xml))
    }

    async fn start_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.ec2, "ec2").await?;
        let params = vec![("InstanceId.1".to_string(), instance.to_string())];
        client
            .query("StartInstances", EC2_API_VERSION, &params)
            .await?;
        Ok(format!("EC2 instance {} started.", instance))
    }

    async fn stop_vm(&self, instance: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.ec2, "ec2").await?;
        let params = vec![("InstanceId.1".to_string(), instance.to_string())];
        client
            .query("StopInstances", EC2_API_VERSION, &params)
            .await?;
        Ok(format!("EC2 instance {} stopped.", instance))
    }

    async fn list_buckets(
        &self,
        _account: Option<&str>,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.s3, "s3").await?;
        let xml = client.rest("GET", "/", &[], Vec::new()).await?;
        Ok(parse_bucket_names(&xml))
    }

    async fn create_bucket(
        &self,
        name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let client = self.client(&self.s3, "s3").await?;
        // us-east-1 rejects an explicit LocationConstraint for itself.
        let body = if self.settings.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.settings.region
            )
            .into_bytes()
        };
        client
            .rest("PUT", &format!("/{}", uri_encode(name)), &[], body)
            .await?;
        Ok(format!("S3 bucket {} created.", name))
    }

    async fn upload_file_to_bucket(
        &self,
        file_path: &str,
        bucket: &str,
        object_name: &str,
        _account: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        // Read before touching the network so a bad path never needs credentials.
        let body = tokio::fs::read(file_path).await?;
        let client = self.client(&self.s3, "s3").await?;
        let path = format!("/{}/{}", uri_encode(bucket), uri_encode(object_name));
        client.rest("PUT", &path, &[], body).await?;
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
        let params = vec![
            ("Namespace".to_string(), "AWS/EC2".to_string()),
            ("MetricName".to_string(), "CPUUtilization".to_string()),
            ("Dimensions.member.1.Name".to_string(), "InstanceId".to_string()),
            ("Dimensions.member.1.Value".to_string(), instance.to_string()),
            ("StartTime".to_string(), start.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("EndTime".to_string(), end.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("Period".to_string(), "60".to_string()),
            ("Statistics.member.1".to_string(), "Average".to_string()),
        ];
        let xml = client
            .query("GetMetricStatistics", CLOUDWATCH_API_VERSION, &params)
            .await?;
        let averages = parse_datapoint_averages(&xml);
        Ok(match mean(&averages) {
            Some(avg) => format!("Average CPU usage for EC2 instance {}: {:.2}%", instance, avg),
            None => format!("No CPU usage data found for EC2 instance {}.", instance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIBE_INSTANCES: &str = "\
<DescribeInstancesResponse>\
  <reservationSet>\
    <item>\
      <instancesSet>\
        <item>\
          <instanceId>i-0abc</instanceId>\
          <tagSet>\
            <item><key>env</key><value>prod</value></item>\
            <item><key>Name</key><value>web-1</value></item>\
          </tagSet>\
        </item>\
        <item>\
          <instanceId>i-0def</instanceId>\
        </item>\
      </instancesSet>\
    </item>\
  </reservationSet>\
</DescribeInstancesResponse>";

    #[test]
    fn instance_names_prefer_the_name_tag() {
        assert_eq!(parse_instance_names(DESCRIBE_INSTANCES), vec!["web-1", "i-0def"]);
    }

    #[test]
    fn no_reservations_means_empty_list() {
        let xml = "<DescribeInstancesResponse><reservationSet/></DescribeInstancesResponse>";
        assert!(parse_instance_names(xml).is_empty());
    }

    #[test]
    fn bucket_names_ignore_owner_fields() {
        let xml = "\
<ListAllMyBucketsResult>\
  <Owner><DisplayName>me</DisplayName></Owner>\
  <Buckets>\
    <Bucket><Name>alpha</Name><CreationDate>2024-01-01T00:00:00Z</CreationDate></Bucket>\
    <Bucket><Name>beta</Name></Bucket>\
  </Buckets>\
</ListAllMyBucketsResult>";
        assert_eq!(parse_bucket_names(xml), vec!["alpha", "beta"]);
    }

    #[test]
    fn datapoint_averages_parse_and_tolerate_absence() {
        let xml = "\
<GetMetricStatisticsResult><Datapoints>\
  <member><Average>12.5</Average><Unit>Percent</Unit></member>\
  <member><Average>17.5</Average></member>\
</Datapoints></GetMetricStatisticsResult>";
        let averages = parse_datapoint_averages(xml);
        assert_eq!(averages, vec![12.5, 17.5]);
        assert_eq!(mean(&averages), Some(15.0));
        assert!(parse_datapoint_averages("<Datapoints/>").is_empty());
    }

    #[test]
    fn nested_blocks_are_returned_outermost_only() {
        let xml = "<item>a<item>b</item>c</item><item>d</item>";
        let blocks = xml_blocks(xml, "item");
        assert_eq!(blocks, vec!["a<item>b</item>c", "d"]);
    }
}
