pub mod namecheap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Success,
    Error,
}

/// One NDJSON line of the update stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainResult {
    pub domain: String,
    pub status: DomainStatus,
    pub message: String,
}

impl DomainResult {
    pub fn success(domain: &str, message: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            status: DomainStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(domain: &str, message: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            status: DomainStatus::Error,
            message: message.into(),
        }
    }
}
