//! Remote knowledge-graph extraction client.
//!
//! Alternate backend path producing an entity/relationship graph instead of
//! a topic tree. The extraction service runs episodic extraction server-side
//! and accumulates the graph per session; every ingest call returns the full
//! accumulated graph. The service holds no credentials of its own - callers
//! attach their provider keys to each request.

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;
use zeroize::Zeroize;

use crate::error::UpdateError;
use crate::settings::LlmProvider;
use crate::structure::GraphStructure;
use crate::structuring::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};

/// Client for the remote graph extraction service.
///
/// Cloning is cheap and shares the underlying connection pool; each clone
/// zeroizes its own copy of the keys on drop.
#[derive(Clone)]
pub(crate) struct ExtractionClient {
    base_url: Url,
    provider: LlmProvider,
    api_key: String,
    embedder_api_key: String,
    client: reqwest::Client,
}

/// Request body for the ingest endpoint.
#[derive(Debug, Serialize)]
struct IngestRequest {
    session_id: String,
    text: String,
    llm_provider: String,
    llm_api_key: String,
    openai_api_key: String,
    timestamp: String,
}

/// Response from the ingest endpoint.
#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    entities_added: u32,
    #[serde(default)]
    relationships_added: u32,
    graph: GraphStructure,
}

/// Request body for the search endpoint.
#[derive(Debug, Serialize)]
struct SearchRequest {
    session_id: String,
    query: String,
    llm_provider: String,
    llm_api_key: String,
    openai_api_key: String,
}

/// Response from the search endpoint.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// One fact returned by graph search.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchResult {
    #[serde(default)]
    pub fact: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
}

/// Response from the health endpoint.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

impl ExtractionClient {
    /// Create a client for the extraction service at `base_url`.
    pub(crate) fn new(
        base_url: &str,
        provider: LlmProvider,
        api_key: &str,
        embedder_api_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid extraction service URL")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for ExtractionClient")?;

        Ok(Self {
            base_url,
            provider,
            api_key: api_key.to_string(),
            embedder_api_key: embedder_api_key.unwrap_or_default().to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpdateError> {
        self.base_url
            .join(path)
            .map_err(|e| UpdateError::RemoteUnreachable(format!("bad endpoint {path}: {e}")))
    }

    /// Feed newly transcribed text to the service and return the full
    /// accumulated graph for the session.
    #[instrument(skip(self, text), fields(session_id = %session_id, text_len = text.len()))]
    pub(crate) async fn ingest(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<GraphStructure, UpdateError> {
        let url = self.endpoint("/api/ingest")?;
        let request_body = IngestRequest {
            session_id: session_id.to_string(),
            text: text.to_string(),
            llm_provider: self.provider.wire_name().to_string(),
            llm_api_key: self.api_key.clone(),
            openai_api_key: self.embedder_api_key.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };

        let result = self.client.post(url).json(&request_body).send().await;
        match result {
            Ok(response) => {
                if response.status().is_success() {
                    let parsed: IngestResponse = response.json().await.map_err(|e| {
                        UpdateError::StructureParse(format!(
                            "Failed to decode ingest response: {e}"
                        ))
                    })?;
                    info!(
                        entities_added = parsed.entities_added,
                        relationships_added = parsed.relationships_added,
                        "Extraction ingest accepted"
                    );
                    Ok(parsed.graph)
                } else {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    Err(UpdateError::from_status(status, message))
                }
            }
            Err(e) => Err(UpdateError::RemoteUnreachable(e.to_string())),
        }
    }

    /// Fetch the accumulated graph without ingesting anything.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub(crate) async fn get_graph(&self, session_id: &str) -> Result<GraphStructure, UpdateError> {
        let mut url = self.endpoint("/api/graph")?;
        url.query_pairs_mut().append_pair("session_id", session_id);

        let result = self.client.get(url).send().await;
        match result {
            Ok(response) => {
                if response.status().is_success() {
                    response.json().await.map_err(|e| {
                        UpdateError::StructureParse(format!("Failed to decode graph response: {e}"))
                    })
                } else {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    Err(UpdateError::from_status(status, message))
                }
            }
            Err(e) => Err(UpdateError::RemoteUnreachable(e.to_string())),
        }
    }

    /// Semantic search over the session's accumulated facts.
    #[instrument(skip(self, query), fields(session_id = %session_id))]
    pub(crate) async fn search(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>, UpdateError> {
        let url = self.endpoint("/api/search")?;
        let request_body = SearchRequest {
            session_id: session_id.to_string(),
            query: query.to_string(),
            llm_provider: self.provider.wire_name().to_string(),
            llm_api_key: self.api_key.clone(),
            openai_api_key: self.embedder_api_key.clone(),
        };

        let result = self.client.post(url).json(&request_body).send().await;
        match result {
            Ok(response) => {
                if response.status().is_success() {
                    let parsed: SearchResponse = response.json().await.map_err(|e| {
                        UpdateError::StructureParse(format!(
                            "Failed to decode search response: {e}"
                        ))
                    })?;
                    Ok(parsed.results)
                } else {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    Err(UpdateError::from_status(status, message))
                }
            }
            Err(e) => Err(UpdateError::RemoteUnreachable(e.to_string())),
        }
    }

    /// Liveness probe. Used before a session commits to graph mode.
    pub(crate) async fn health(&self) -> bool {
        let Ok(url) = self.endpoint("/api/health") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|health| health.status == "ok")
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl Drop for ExtractionClient {
    fn drop(&mut self) {
        // Clear API keys from memory
        self.api_key.zeroize();
        self.embedder_api_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_request_serialization() {
        let request = IngestRequest {
            session_id: "session-1".to_string(),
            text: "[Speaker 0]: hello".to_string(),
            llm_provider: "anthropic".to_string(),
            llm_api_key: "sk-ant-test".to_string(),
            openai_api_key: String::new(),
            timestamp: "2026-02-11T10:00:00+00:00".to_string(),
        };

        let json = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(json.contains("\"session_id\":\"session-1\""));
        assert!(json.contains("\"llm_provider\":\"anthropic\""));
        assert!(json.contains("\"openai_api_key\":\"\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_ingest_response_deserialization() {
        let json = r#"{
            "entities_added": 2,
            "relationships_added": 1,
            "graph": {
                "entities": [
                    {"id": "e-1", "name": "Migration", "summary": "", "type": "project",
                     "created_at": "2026-02-11T10:00:00Z", "degree": 1, "community": null}
                ],
                "relationships": [
                    {"id": "r-1", "source_id": "e-1", "target_id": "e-2",
                     "fact": "Migration blocks release", "type": "blocks",
                     "valid_at": null, "invalid_at": null}
                ],
                "metadata": {
                    "session_id": "session-1",
                    "entity_count": 1,
                    "relationship_count": 1,
                    "last_updated": "2026-02-11T10:00:05Z"
                }
            }
        }"#;

        let response: IngestResponse = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.entities_added, 2);
        assert_eq!(response.graph.entities.len(), 1);
        assert_eq!(response.graph.relationships[0].kind, "blocks");
        assert_eq!(response.graph.metadata.session_id, "session-1");
    }

    #[test]
    fn test_search_response_deserialization() {
        let json = r#"{"results": [
            {"fact": "Migration blocks release", "source": "Migration", "target": "Release"}
        ]}"#;
        let response: SearchResponse = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].source, "Migration");
    }

    #[test]
    fn test_health_response_deserialization() {
        let healthy: HealthResponse =
            serde_json::from_str(r#"{"status": "ok", "falkordb": "connected"}"#)
                .expect("Failed to deserialize");
        assert_eq!(healthy.status, "ok");

        let empty: HealthResponse = serde_json::from_str("{}").expect("Failed to deserialize");
        assert_ne!(empty.status, "ok");
    }

    #[test]
    fn test_endpoint_joins_against_base_url() {
        let client = ExtractionClient::new(
            "http://localhost:8000",
            LlmProvider::Anthropic,
            "sk-ant-test",
            None,
        )
        .expect("Failed to build client");

        let url = client.endpoint("/api/ingest").expect("Failed to join URL");
        assert_eq!(url.as_str(), "http://localhost:8000/api/ingest");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = ExtractionClient::new("not a url", LlmProvider::OpenAI, "sk-test", None);
        assert!(result.is_err());
    }
}
