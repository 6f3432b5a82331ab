//! AWS Signature Version 4 request signing.
//!
//! Produces the `Authorization` header (plus `host`, `x-amz-date` and, for S3,
//! `x-amz-content-sha256`) for a request against one region/service pair. The
//! derivation follows the AWS4-HMAC-SHA256 scheme: canonical request, string to
//! sign, then the four-step HMAC key chain.

use std::error::Error;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Unreserved characters per RFC 3986 stay literal, everything else is encoded.
const AWS_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Signs requests for one (credentials, region, service) combination.
#[derive(Clone)]
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        SigV4Signer {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    /// Sign a request, returning the full header set to attach: `host`,
    /// `x-amz-date`, `x-amz-content-sha256` (S3 only), any `extra_headers`
    /// passed in, and the computed `authorization`.
    pub fn sign_request(
        &self,
        method: &str,
        url: &Url,
        extra_headers: &[(String, String)],
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, Box<dyn Error + Send + Sync>> {
        let host = url
            .host_str()
            .ok_or_else(|| format!("URL '{}' has no host", url))?
            .to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date = timestamp.format("%Y%m%d").to_string();
        let payload_hash = sha256_hex(body);

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        // S3 requires the payload hash as a signed header; the query-protocol
        // services reject unknown x-amz headers less gracefully, so keep it
        // scoped to S3.
        if self.service == "s3" {
            headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
        }
        for (name, value) in extra_headers {
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.to_ascii_uppercase(),
            canonical_uri(url),
            canonical_query(url),
            canonical_headers,
            signed_headers,
            payload_hash,
        );

        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes()),
        );

        let signing_key = self.derive_signing_key(&date)?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key_id, scope, signed_headers, signature,
        );
        headers.push(("authorization".to_string(), authorization));
        Ok(headers)
    }

    /// AWS4 HMAC key chain: secret -> date -> region -> service -> aws4_request.
    fn derive_signing_key(&self, date: &str) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        let secret = format!("AWS4{}", self.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, AWS_ENCODE_SET).to_string()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| format!("invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Vectors from the published SigV4 test suite ("get-vanilla").
    #[test]
    fn signs_the_reference_get_request() {
        let signer = SigV4Signer::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "us-east-1",
            "service",
        );
        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let timestamp = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        let headers = signer
            .sign_request("GET", &url, &[], b"", timestamp)
            .unwrap();
        let authorization = headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone())
            .unwrap();

        assert!(authorization.contains(
            "Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request"
        ));
        assert!(authorization.contains("SignedHeaders=host;x-amz-date"));
        assert!(authorization.ends_with(
            "Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        ));
    }

    #[test]
    fn derives_the_reference_signing_key() {
        let signer = SigV4Signer::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "us-east-1",
            "iam",
        );
        let key = signer.derive_signing_key("20150830").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn canonical_query_is_sorted_and_encoded() {
        let url = Url::parse("https://ec2.us-east-1.amazonaws.com/?Version=2016-11-15&Action=DescribeInstances&Filter.1.Value.1=running state").unwrap();
        assert_eq!(
            canonical_query(&url),
            "Action=DescribeInstances&Filter.1.Value.1=running%20state&Version=2016-11-15"
        );
    }

    #[test]
    fn empty_payload_hash_constant_matches() {
        assert_eq!(sha256_hex(b""), EMPTY_PAYLOAD_HASH);
    }

    #[test]
    fn s3_requests_carry_the_content_hash_header() {
        let signer = SigV4Signer::new("ak", "sk", "us-east-1", "s3");
        let url = Url::parse("https://s3.us-east-1.amazonaws.com/bucket/key").unwrap();
        let headers = signer
            .sign_request("PUT", &url, &[], b"hello", Utc::now())
            .unwrap();
        assert!(headers
            .iter()
            .any(|(name, value)| name == "x-amz-content-sha256" && value == &sha256_hex(b"hello")));
    }
}
