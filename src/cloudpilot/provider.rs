//! Closed enumerations over the supported cloud providers, vector backends and
//! LLM providers, plus the tolerant parsers used at configuration boundaries.
//!
//! Internally every dispatch over these types is an exhaustive `match`; the only
//! place unknown names survive is the user-facing comma-separated provider list,
//! where they are skipped silently so a request for `aws,bogus,gcp` still serves
//! the two providers it can.

use std::fmt;
use std::str::FromStr;

/// One of the four supported cloud platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    IbmCloud,
}

impl CloudProvider {
    /// All providers, in the order summaries are keyed.
    pub const ALL: [CloudProvider; 4] = [
        CloudProvider::Aws,
        CloudProvider::Azure,
        CloudProvider::Gcp,
        CloudProvider::IbmCloud,
    ];

    /// Fixed key casing used in aggregated resource summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "AWS",
            CloudProvider::Azure => "Azure",
            CloudProvider::Gcp => "GCP",
            CloudProvider::IbmCloud => "IBMCloud",
        }
    }

    /// Lowercase prefix used in agent-facing tool names (`aws_list_vms`, ...).
    pub fn tool_prefix(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
            CloudProvider::IbmCloud => "ibmcloud",
        }
    }

    /// Parse a comma-separated provider list, trimming whitespace and silently
    /// skipping empty segments and names that match no provider. Duplicates are
    /// collapsed, first occurrence wins the ordering.
    pub fn parse_list(input: &str) -> Vec<CloudProvider> {
        let mut out = Vec::new();
        for segment in input.split(',') {
            let name = segment.trim();
            if name.is_empty() {
                continue;
            }
            if let Ok(provider) = name.parse::<CloudProvider>() {
                if !out.contains(&provider) {
                    out.push(provider);
                }
            }
        }
        out
    }
}

impl FromStr for CloudProvider {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" => Ok(CloudProvider::Gcp),
            "ibmcloud" | "ibm" => Ok(CloudProvider::IbmCloud),
            other => Err(UnknownNameError {
                kind: "cloud provider",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Vector store backend selected by `VECTORSTORE_CLASS`.
///
/// The three variants differ in durability semantics:
/// `Flat` persists only on an explicit save, `Jsonl` rewrites its log on every
/// mutation, and `Sqlite` is always durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Flat,
    Jsonl,
    Sqlite,
}

impl VectorBackend {
    pub fn name(&self) -> &'static str {
        match self {
            VectorBackend::Flat => "flat",
            VectorBackend::Jsonl => "jsonl",
            VectorBackend::Sqlite => "sqlite",
        }
    }

    /// Directory the backend persists under, relative to the working directory.
    pub fn persist_dir(&self) -> String {
        format!("./vectorstore_{}", self.name())
    }
}

impl FromStr for VectorBackend {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(VectorBackend::Flat),
            "jsonl" => Ok(VectorBackend::Jsonl),
            "sqlite" => Ok(VectorBackend::Sqlite),
            other => Err(UnknownNameError {
                kind: "vector backend",
                name: other.to_string(),
            }),
        }
    }
}

/// Chat model provider selected by `LLM_PROVIDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Gemini,
    Watsonx,
}

impl FromStr for LlmProvider {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "gemini" => Ok(LlmProvider::Gemini),
            "watsonx" => Ok(LlmProvider::Watsonx),
            other => Err(UnknownNameError {
                kind: "LLM provider",
                name: other.to_string(),
            }),
        }
    }
}

/// Error for a name that matches no variant of a closed enum.
#[derive(Debug, Clone)]
pub struct UnknownNameError {
    kind: &'static str,
    name: String,
}

impl fmt::Display for UnknownNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.name)
    }
}

impl std::error::Error for UnknownNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_skips_unknown_and_empty_segments() {
        let providers = CloudProvider::parse_list("aws, bogus,, GCP ,azure");
        assert_eq!(
            providers,
            vec![CloudProvider::Aws, CloudProvider::Gcp, CloudProvider::Azure]
        );
    }

    #[test]
    fn parse_list_collapses_duplicates() {
        let providers = CloudProvider::parse_list("gcp,aws,gcp");
        assert_eq!(providers, vec![CloudProvider::Gcp, CloudProvider::Aws]);
    }

    #[test]
    fn parse_list_of_garbage_is_empty() {
        assert!(CloudProvider::parse_list(" , nope , ").is_empty());
    }

    #[test]
    fn display_names_have_fixed_casing() {
        assert_eq!(CloudProvider::Aws.display_name(), "AWS");
        assert_eq!(CloudProvider::IbmCloud.display_name(), "IBMCloud");
    }

    #[test]
    fn ibm_accepts_short_alias() {
        assert_eq!("ibm".parse::<CloudProvider>().ok(), Some(CloudProvider::IbmCloud));
    }

    #[test]
    fn unknown_llm_provider_is_an_error() {
        let err = "mistral".parse::<LlmProvider>().unwrap_err();
        assert!(err.to_string().contains("unknown LLM provider"));
    }

    #[test]
    fn backend_persist_dirs() {
        assert_eq!(VectorBackend::Sqlite.persist_dir(), "./vectorstore_sqlite");
    }
}
