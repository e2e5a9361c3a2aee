//! Search index push
//!
//! Write-only client for the external full-text/prefix index. Every lead
//! create/update/delete pushes a denormalized record. Failures are logged by
//! the caller and never block the primary write.

use afc_common::config::{resolve_search_api_key, TomlConfig};
use afc_common::model::Lead;
use afc_common::LeadId;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("afc-engine/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Index returned {0}: {1}")]
    Api(u16, String),
}

/// Denormalized lead record held by the index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    pub id: LeadId,
    pub name: String,
    pub email: Option<String>,
    pub phones: Vec<String>,
    pub relationship: String,
    pub status: Option<String>,
    #[serde(rename = "afc_step")]
    pub afc_step: u8,
}

impl From<&Lead> for SearchRecord {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id.clone(),
            name: lead.name.clone(),
            email: lead.email.clone(),
            phones: lead.phone_numbers().map(str::to_string).collect(),
            relationship: lead.relationship.to_string(),
            status: lead.status.map(|s| s.as_str().to_string()),
            afc_step: lead.afc_step,
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, record: &SearchRecord) -> Result<(), SearchIndexError>;

    async fn remove(&self, id: &LeadId) -> Result<(), SearchIndexError>;
}

/// Used when no index endpoint is configured
#[derive(Debug, Default)]
pub struct NullSearchIndex;

#[async_trait]
impl SearchIndex for NullSearchIndex {
    async fn upsert(&self, record: &SearchRecord) -> Result<(), SearchIndexError> {
        tracing::trace!(lead_id = %record.id, "Search index disabled, skipping upsert");
        Ok(())
    }

    async fn remove(&self, id: &LeadId) -> Result<(), SearchIndexError> {
        tracing::trace!(lead_id = %id, "Search index disabled, skipping remove");
        Ok(())
    }
}

/// JSON-over-HTTP index: `PUT {url}/records/{id}` and `DELETE {url}/records/{id}`
pub struct HttpSearchIndex {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchIndex {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_ms: u64) -> Result<Self, SearchIndexError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SearchIndexError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn record_url(&self, id: &LeadId) -> String {
        format!("{}/records/{}", self.base_url, id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), SearchIndexError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| SearchIndexError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchIndexError::Api(status.as_u16(), body));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, record: &SearchRecord) -> Result<(), SearchIndexError> {
        tracing::debug!(lead_id = %record.id, "Pushing lead to search index");
        self.send(self.http_client.put(self.record_url(&record.id)).json(record))
            .await
    }

    async fn remove(&self, id: &LeadId) -> Result<(), SearchIndexError> {
        tracing::debug!(lead_id = %id, "Removing lead from search index");
        self.send(self.http_client.delete(self.record_url(id))).await
    }
}

/// Index client for the loaded configuration
pub fn from_config(config: &TomlConfig) -> Arc<dyn SearchIndex> {
    let Some(url) = config.search_index.url.as_deref().filter(|u| !u.trim().is_empty()) else {
        tracing::info!("No search index configured, search push disabled");
        return Arc::new(NullSearchIndex);
    };

    let api_key = resolve_search_api_key(config);
    if api_key.is_none() {
        tracing::warn!(url, "Search index configured without an API key");
    }

    match HttpSearchIndex::new(url, api_key, config.search_index.timeout_ms) {
        Ok(index) => {
            tracing::info!(url, "Search index push enabled");
            Arc::new(index)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not build search index client, search push disabled");
            Arc::new(NullSearchIndex)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afc_common::model::{LeadStatus, Phone, PhoneType};
    use chrono::Utc;

    #[test]
    fn test_record_from_lead() {
        let mut lead = Lead::new("Layla", Utc::now());
        lead.email = Some("layla@example.com".to_string());
        lead.phones.push(Phone {
            number: "971501234567".to_string(),
            phone_type: PhoneType::Chat,
        });
        lead.status = Some(LeadStatus::Active);
        lead.afc_step = 2;

        let record = SearchRecord::from(&lead);
        assert_eq!(record.phones, vec!["971501234567".to_string()]);
        assert_eq!(record.status.as_deref(), Some("Active"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["afc_step"], 2);
        assert_eq!(json["relationship"], "Lead");
    }

    #[tokio::test]
    async fn test_unconfigured_index_is_null() {
        let index = from_config(&TomlConfig::default());
        let lead = Lead::new("Layla", Utc::now());
        assert!(index.upsert(&SearchRecord::from(&lead)).await.is_ok());
        assert!(index.remove(&lead.id).await.is_ok());
    }

    #[test]
    fn test_record_url_strips_trailing_slash() {
        let index = HttpSearchIndex::new("http://localhost:9200/", None, 1000).unwrap();
        assert_eq!(
            index.record_url(&LeadId::from("abc")),
            "http://localhost:9200/records/abc"
        );
    }
}
