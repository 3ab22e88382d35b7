//! Integration tests for the knowledge base connector using wiremock

use kbgate_core::{
    Error, TenantContext, TenantResolver, TenantSource,
    retrieval::{
        DEFAULT_TENANT_FILTER_KEY, RetrievalLimits, RetrievalQuery, RetrievalRequest, Retriever,
    },
};
use kbgate_egress::knowledge_base::{KnowledgeBaseClient, KnowledgeBaseConfig};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

fn tenant(id: &str) -> TenantContext {
    TenantResolver::new(TenantSource::Static {
        tenant_id: id.to_string(),
    })
    .unwrap()
    .resolve(&http::HeaderMap::new())
    .unwrap()
}

fn client_for(server: &MockServer) -> KnowledgeBaseClient {
    let mut config = KnowledgeBaseConfig::for_region("us-west-2").with_base_url(server.uri());
    config.client_config.max_retries = 1;
    KnowledgeBaseClient::new(config).unwrap()
}

fn scoped(text: &str, tenant_id: &str) -> RetrievalRequest {
    RetrievalRequest::tenant_scoped(
        "KB123",
        &RetrievalQuery::new(text),
        &tenant(tenant_id),
        DEFAULT_TENANT_FILTER_KEY,
        RetrievalLimits::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_retrieve_sends_tenant_filter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "retrievalQuery": {"text": "What is the refund policy?"},
            "retrievalConfiguration": {
                "vectorSearchConfiguration": {
                    "numberOfResults": 5,
                    "filter": {"equals": {"key": "tenant_id", "value": "tenant-a"}}
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retrievalResults": [{
                "content": {"text": "Refunds are accepted within 30 days.", "type": "TEXT"},
                "score": 0.87,
                "location": {"type": "S3", "s3Location": {"uri": "s3://kb-docs/tenant-a/refunds.md"}}
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let results = client
        .retrieve(scoped("What is the refund policy?", "tenant-a"))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "Refunds are accepted within 30 days.");
    assert_eq!(results[0].score, 0.87);
    assert_eq!(
        results[0].source.as_deref(),
        Some("s3://kb-docs/tenant-a/refunds.md")
    );
}

#[tokio::test]
async fn test_retrieve_empty_results() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retrievalResults": []})))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let results = client.retrieve(scoped("anything", "tenant-b")).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_retrieve_sends_service_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .and(header("authorization", "Bearer proxy-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retrievalResults": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = KnowledgeBaseConfig::for_region("us-west-2")
        .with_base_url(mock_server.uri())
        .with_service_token("proxy-token");
    let client = KnowledgeBaseClient::new(config).unwrap();

    client.retrieve(scoped("q", "tenant-a")).await.unwrap();
}

#[tokio::test]
async fn test_retrieve_service_error_maps_to_retrieval() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "User is not authorized to perform: bedrock:Retrieve"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.retrieve(scoped("q", "tenant-a")).await.unwrap_err();

    match err {
        Error::Retrieval(msg) => assert!(msg.contains("403"), "got {msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_retrieve_retries_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.retrieve(scoped("q", "tenant-a")).await.unwrap_err();
    assert!(matches!(err, Error::Retrieval(_)));
}

#[tokio::test]
async fn test_retrieve_throttled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.retrieve(scoped("q", "tenant-a")).await.unwrap_err();

    match err {
        Error::RateLimitExceeded { retry_after_secs } => assert_eq!(retry_after_secs, Some(3)),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_retrieve_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledgebases/KB123/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.retrieve(scoped("q", "tenant-a")).await.unwrap_err();
    assert!(matches!(err, Error::Retrieval(_)));
}
