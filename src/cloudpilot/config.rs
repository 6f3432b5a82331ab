//! Environment-sourced service configuration.
//!
//! All settings are read once at startup; credentials that a provider needs are
//! only validated when that provider's client is first constructed, so a
//! deployment that never touches Azure does not need Azure credentials.

use std::env;
use std::error::Error;

use crate::cloudpilot::provider::{CloudProvider, LlmProvider, VectorBackend};

/// Directory uploaded files are staged under before ingestion.
pub const UPLOAD_DIR: &str = "./temp_uploads";

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// AWS credentials and region scope.
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Azure service-principal credentials plus subscription scoping.
#[derive(Debug, Clone, Default)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// GCP project scoping and a pre-issued access token.
#[derive(Debug, Clone, Default)]
pub struct GcpSettings {
    pub project_id: Option<String>,
    pub zone: String,
    pub access_token: Option<String>,
}

/// IBM Cloud API key and VPC scoping.
#[derive(Debug, Clone, Default)]
pub struct IbmSettings {
    pub api_key: Option<String>,
    pub region: String,
    pub vpc_instance_id: Option<String>,
}

/// Chat model selection and per-provider keys.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub watsonx_api_key: Option<String>,
    pub watsonx_project_id: Option<String>,
    pub watsonx_url: Option<String>,
    pub watsonx_model: String,
    pub watsonx_api_version: String,
}

/// Fully resolved service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cloud_providers: Vec<CloudProvider>,
    pub vector_backend: VectorBackend,
    pub llm: LlmSettings,
    pub aws: AwsSettings,
    pub azure: AzureSettings,
    pub gcp: GcpSettings,
    pub ibm: IbmSettings,
    pub bind_addr: String,
    pub upload_dir: String,
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// Unknown values for the closed selectors (`LLM_PROVIDER`,
    /// `VECTORSTORE_CLASS`) fail fast; the cloud provider list is parsed
    /// tolerantly, unknown names contribute nothing.
    pub fn from_env() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let llm_provider: LlmProvider = env_or("LLM_PROVIDER", "gemini").parse()?;
        let vector_backend: VectorBackend = env_or("VECTORSTORE_CLASS", "jsonl").parse()?;
        let cloud_providers = CloudProvider::parse_list(&env_or("CLOUD_PROVIDERS", "gcp"));

        Ok(Settings {
            cloud_providers,
            vector_backend,
            llm: LlmSettings {
                provider: llm_provider,
                openai_api_key: env_opt("LLM_OPENAI_API_KEY"),
                openai_model: env_or("LLM_OPENAI_MODEL", "gpt-4o-mini"),
                gemini_api_key: env_opt("LLM_GEMINI_API_KEY"),
                gemini_model: env_or("LLM_GEMINI_MODEL", "gemini-2.0-flash"),
                watsonx_api_key: env_opt("LLM_WATSONX_API_KEY"),
                watsonx_project_id: env_opt("LLM_WATSONX_PROJECT_ID"),
                watsonx_url: env_opt("LLM_WATSONX_URL"),
                watsonx_model: env_or("LLM_WATSONX_MODEL", "ibm/granite-13b-instruct-v2"),
                watsonx_api_version: env_or("WATSONX_API_VERSION", "2023-08-01"),
            },
            aws: AwsSettings {
                region: env_or("AWS_REGION", "us-east-1"),
                access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
                secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            },
            azure: AzureSettings {
                subscription_id: env_opt("AZURE_SUBSCRIPTION_ID"),
                resource_group: env_opt("AZURE_RESOURCE_GROUP"),
                tenant_id: env_opt("AZURE_TENANT_ID"),
                client_id: env_opt("AZURE_CLIENT_ID"),
                client_secret: env_opt("AZURE_CLIENT_SECRET"),
            },
            gcp: GcpSettings {
                project_id: env_opt("GCP_PROJECT_ID"),
                zone: env_or("GCP_ZONE", "us-central1-a"),
                access_token: env_opt("GCP_ACCESS_TOKEN"),
            },
            ibm: IbmSettings {
                api_key: env_opt("IBM_API_KEY"),
                region: env_or("IBM_REGION", "jp-tok"),
                vpc_instance_id: env_opt("IBM_VPC_INSTANCE_ID"),
            },
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
            upload_dir: UPLOAD_DIR.to_string(),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cloud_providers: vec![CloudProvider::Gcp],
            vector_backend: VectorBackend::Jsonl,
            llm: LlmSettings {
                provider: LlmProvider::Gemini,
                openai_api_key: None,
                openai_model: "gpt-4o-mini".to_string(),
                gemini_api_key: None,
                gemini_model: "gemini-2.0-flash".to_string(),
                watsonx_api_key: None,
                watsonx_project_id: None,
                watsonx_url: None,
                watsonx_model: "ibm/granite-13b-instruct-v2".to_string(),
                watsonx_api_version: "2023-08-01".to_string(),
            },
            aws: AwsSettings {
                region: "us-east-1".to_string(),
                ..AwsSettings::default()
            },
            azure: AzureSettings::default(),
            gcp: GcpSettings {
                zone: "us-central1-a".to_string(),
                ..GcpSettings::default()
            },
            ibm: IbmSettings {
                region: "jp-tok".to_string(),
                ..IbmSettings::default()
            },
            bind_addr: "0.0.0.0:8000".to_string(),
            upload_dir: UPLOAD_DIR.to_string(),
        }
    }
}
