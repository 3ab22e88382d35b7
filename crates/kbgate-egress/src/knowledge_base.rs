//! Knowledge base retrieval connector

use crate::{
    Result, Service,
    client::{HttpClientConfig, create_client, with_retry, with_service_token},
    error_from_response, EgressError,
};
use async_trait::async_trait;
use kbgate_core::retrieval::{MetadataFilter, RetrievalRequest, RetrievalResult, Retriever};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use urlencoding::encode;

/// Metadata attribute some knowledge bases use for the source document.
const SOURCE_URI_METADATA_KEY: &str = "x-amz-bedrock-kb-source-uri";

/// Knowledge base connector configuration
#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    /// Base URL of the retrieval runtime API
    pub base_url: String,

    /// Bearer token for the signing proxy or gateway in front of the service
    pub service_token: Option<String>,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl KnowledgeBaseConfig {
    /// Configuration for the regional endpoint
    pub fn for_region(region: &str) -> Self {
        Self {
            base_url: format!("https://bedrock-agent-runtime.{}.amazonaws.com", region),
            service_token: None,
            client_config: HttpClientConfig::for_lookup_service(),
        }
    }

    /// Set the base URL (for proxies and tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the bearer token
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }
}

/// Knowledge base connector
pub struct KnowledgeBaseClient {
    config: KnowledgeBaseConfig,
    client: Client,
}

impl KnowledgeBaseClient {
    /// Create a new knowledge base connector
    pub fn new(config: KnowledgeBaseConfig) -> Result<Self> {
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    fn retrieve_url(&self, knowledge_base_id: &str) -> String {
        format!(
            "{}/knowledgebases/{}/retrieve",
            self.config.base_url.trim_end_matches('/'),
            encode(knowledge_base_id)
        )
    }

    #[instrument(skip(self, request), fields(kb = %request.knowledge_base_id, results = request.number_of_results))]
    async fn send_retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalResult>> {
        let body = to_retrieve_body(request);
        let url = self.retrieve_url(&request.knowledge_base_id);

        with_retry(self.config.client_config.max_retries, || {
            let body = &body;
            let url = &url;
            async move {
                let builder = self.client.post(url.as_str()).json(body);
                let response = with_service_token(builder, self.config.service_token.as_deref())
                    .send()
                    .await?;

                debug!("Knowledge base responded with {}", response.status());

                if !response.status().is_success() {
                    return Err(error_from_response(response).await);
                }

                let parsed = response.json::<RetrieveResponse>().await.map_err(|e| {
                    EgressError::ParseError(format!("Failed to parse retrieve response: {}", e))
                })?;

                Ok(from_retrieve_response(parsed))
            }
        })
        .await
    }
}

#[async_trait]
impl Retriever for KnowledgeBaseClient {
    async fn retrieve(&self, request: RetrievalRequest) -> kbgate_core::Result<Vec<RetrievalResult>> {
        self.send_retrieve(&request)
            .await
            .map_err(|e| e.into_core(Service::KnowledgeBase))
    }
}

// Retrieval API types

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveBody {
    retrieval_query: RetrievalQueryBody,
    retrieval_configuration: RetrievalConfiguration,
}

#[derive(Debug, Clone, Serialize)]
struct RetrievalQueryBody {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalConfiguration {
    vector_search_configuration: VectorSearchConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VectorSearchConfiguration {
    number_of_results: u32,
    filter: MetadataFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievedItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievedItem {
    #[serde(default)]
    content: Option<RetrievedContent>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    location: Option<RetrievedLocation>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RetrievedContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievedLocation {
    #[serde(default)]
    s3_location: Option<UriLocation>,
    #[serde(default)]
    web_location: Option<UrlLocation>,
}

#[derive(Debug, Clone, Deserialize)]
struct UriLocation {
    uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UrlLocation {
    url: Option<String>,
}

// Conversion functions

fn to_retrieve_body(request: &RetrievalRequest) -> RetrieveBody {
    RetrieveBody {
        retrieval_query: RetrievalQueryBody {
            text: request.text.clone(),
        },
        retrieval_configuration: RetrievalConfiguration {
            vector_search_configuration: VectorSearchConfiguration {
                number_of_results: request.number_of_results,
                filter: request.filter.clone(),
            },
        },
    }
}

fn from_retrieve_response(response: RetrieveResponse) -> Vec<RetrievalResult> {
    response
        .retrieval_results
        .into_iter()
        .map(|item| {
            let source = item
                .location
                .as_ref()
                .and_then(|loc| {
                    loc.s3_location
                        .as_ref()
                        .and_then(|s3| s3.uri.clone())
                        .or_else(|| loc.web_location.as_ref().and_then(|w| w.url.clone()))
                })
                .or_else(|| {
                    item.metadata
                        .get(SOURCE_URI_METADATA_KEY)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });

            RetrievalResult {
                content: item.content.and_then(|c| c.text).unwrap_or_default(),
                score: item.score.unwrap_or(0.0),
                source,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> RetrievalRequest {
        RetrievalRequest {
            knowledge_base_id: "KB123".to_string(),
            text: "What is the refund policy?".to_string(),
            number_of_results: 5,
            filter: MetadataFilter::Equals {
                key: "tenant_id".to_string(),
                value: "tenant-a".to_string(),
            },
        }
    }

    #[test]
    fn test_config_for_region() {
        let config = KnowledgeBaseConfig::for_region("us-west-2");
        assert_eq!(
            config.base_url,
            "https://bedrock-agent-runtime.us-west-2.amazonaws.com"
        );
        assert!(config.service_token.is_none());
    }

    #[test]
    fn test_retrieve_url_trims_trailing_slash() {
        let client = KnowledgeBaseClient::new(
            KnowledgeBaseConfig::for_region("us-east-1").with_base_url("http://localhost:9000/"),
        )
        .unwrap();
        assert_eq!(
            client.retrieve_url("KB123"),
            "http://localhost:9000/knowledgebases/KB123/retrieve"
        );
        assert_eq!(
            client.retrieve_url("kb/../other kb"),
            "http://localhost:9000/knowledgebases/kb%2F..%2Fother%20kb/retrieve"
        );
    }

    #[test]
    fn test_retrieve_body_wire_format() {
        let body = serde_json::to_value(to_retrieve_body(&sample_request())).unwrap();
        assert_eq!(
            body,
            json!({
                "retrievalQuery": {"text": "What is the refund policy?"},
                "retrievalConfiguration": {
                    "vectorSearchConfiguration": {
                        "numberOfResults": 5,
                        "filter": {"equals": {"key": "tenant_id", "value": "tenant-a"}}
                    }
                }
            })
        );
    }

    #[test]
    fn test_from_retrieve_response_sources() {
        let response: RetrieveResponse = serde_json::from_value(json!({
            "retrievalResults": [
                {
                    "content": {"text": "Refunds within 30 days.", "type": "TEXT"},
                    "score": 0.91,
                    "location": {"type": "S3", "s3Location": {"uri": "s3://docs/refunds.md"}}
                },
                {
                    "content": {"text": "Shipping policy."},
                    "score": 0.42,
                    "location": {"type": "WEB", "webLocation": {"url": "https://example.com/shipping"}}
                },
                {
                    "content": {"text": "From metadata."},
                    "score": 0.3,
                    "metadata": {"x-amz-bedrock-kb-source-uri": "s3://docs/meta.md"}
                },
                {
                    "content": {"text": "No source."}
                }
            ]
        }))
        .unwrap();

        let results = from_retrieve_response(response);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].content, "Refunds within 30 days.");
        assert_eq!(results[0].score, 0.91);
        assert_eq!(results[0].source.as_deref(), Some("s3://docs/refunds.md"));
        assert_eq!(
            results[1].source.as_deref(),
            Some("https://example.com/shipping")
        );
        assert_eq!(results[2].source.as_deref(), Some("s3://docs/meta.md"));
        assert_eq!(results[3].source, None);
        assert_eq!(results[3].score, 0.0);
    }

    #[test]
    fn test_from_empty_response() {
        let response: RetrieveResponse = serde_json::from_value(json!({})).unwrap();
        assert!(from_retrieve_response(response).is_empty());
    }
}
