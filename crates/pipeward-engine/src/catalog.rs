//! Client for the external catalog index service.
//!
//! A single GraphQL call: given an organization identifier, return the list
//! of (version, end-of-life) tuples for its index images. The trait seam
//! keeps the engine testable without a live endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::error::EngineError;

/// Shared handle to a catalog client.
pub type DynCatalogClient = Arc<dyn CatalogClient>;

/// One index version reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexVersion {
    /// Platform version string, e.g. `4.16`.
    pub version: String,
    /// End-of-life date; `None` while the version is active.
    pub end_of_life: Option<String>,
}

impl IndexVersion {
    /// Returns `true` while the version has no end-of-life date.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.end_of_life.is_none()
    }
}

/// Read-only catalog lookup.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Returns every index version the catalog knows for the organization.
    async fn index_versions(&self, organization: &str) -> Result<Vec<IndexVersion>, EngineError>;
}

/// Filters a version list down to the active (non-end-of-life) entries.
#[must_use]
pub fn active_versions(versions: Vec<IndexVersion>) -> Vec<IndexVersion> {
    versions.into_iter().filter(IndexVersion::is_active).collect()
}

/// GraphQL-over-HTTP implementation of [`CatalogClient`].
pub struct HttpCatalogClient {
    client: reqwest::Client,
    endpoint: String,
}

const INDEX_VERSIONS_QUERY: &str = "\
query IndexVersions($organization: String!) {
  find_index_versions(filter: { organization: { eq: $organization } }) {
    data {
      version
      end_of_life
    }
  }
}";

impl HttpCatalogClient {
    /// Builds a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Catalog` if the HTTP client cannot be built.
    pub fn new(config: &CatalogConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::catalog(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<ResponseData>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    find_index_versions: IndexPage,
}

#[derive(Debug, Deserialize)]
struct IndexPage {
    #[serde(default)]
    data: Vec<IndexVersion>,
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn index_versions(&self, organization: &str) -> Result<Vec<IndexVersion>, EngineError> {
        let body = serde_json::json!({
            "query": INDEX_VERSIONS_QUERY,
            "variables": { "organization": organization },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::catalog(format!("catalog request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::catalog(format!(
                "catalog returned status {status}"
            )));
        }

        let parsed: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| EngineError::catalog(format!("malformed catalog response: {e}")))?;
        if let Some(errors) = parsed.errors
            && let Some(first) = errors.first()
        {
            return Err(EngineError::catalog(first.message.clone()));
        }
        let data = parsed
            .data
            .ok_or_else(|| EngineError::catalog("catalog response has no data"))?;

        let versions = data.find_index_versions.data;
        debug!(organization, count = versions.len(), "catalog versions fetched");
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_active_version_filtering() {
        let versions = vec![
            IndexVersion {
                version: "4.14".to_string(),
                end_of_life: Some("2025-10-31".to_string()),
            },
            IndexVersion {
                version: "4.16".to_string(),
                end_of_life: None,
            },
            IndexVersion {
                version: "4.17".to_string(),
                end_of_life: None,
            },
        ];

        let active = active_versions(versions);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].version, "4.16");
        assert_eq!(active[1].version, "4.17");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "data": {
                "find_index_versions": {
                    "data": [
                        { "version": "4.16", "end_of_life": null },
                        { "version": "4.14", "end_of_life": "2025-10-31" }
                    ]
                }
            }
        }"#;

        let parsed: GraphqlResponse = serde_json::from_str(raw).expect("parse");
        let versions = parsed.data.expect("data").find_index_versions.data;
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_active());
        assert!(!versions[1].is_active());
    }
}
