//! Integration tests for repository checks and secret publishing.

mod common;

use fedlink_core::{
    PublishOutcome, RepoError, RepositoryRef, RepositorySecretPublisher, StaticToken, TokenError,
    TokenSource, Token,
};
use std::sync::Arc;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

fn publisher(server: &MockServer) -> RepositorySecretPublisher {
    RepositorySecretPublisher::with_api_url(
        Arc::new(StaticToken::new("ghs_static")),
        Url::parse(&server.uri()).unwrap(),
    )
}

fn repo() -> RepositoryRef {
    RepositoryRef::new("octo", "infra")
}

/// A token source that always fails.
struct BrokenTokens;

#[async_trait::async_trait]
impl TokenSource for BrokenTokens {
    async fn get_token(&self) -> Result<Token, TokenError> {
        Err(TokenError::AuthConfig {
            message: "no key".to_string(),
        })
    }
}

#[tokio::test]
async fn test_check_repository_classifies_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/infra"))
        .and(header("authorization", "token ghs_static"))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "full_name": "octo/infra",
            "private": true
        })))
        .mount(&server)
        .await;
    common::mount_repository(&server, "octo", "missing", 404).await;
    common::mount_repository(&server, "octo", "locked", 403).await;
    common::mount_repository(&server, "octo", "flaky", 502).await;

    let publisher = publisher(&server);

    let ok = publisher.check_repository(&repo()).await;
    assert_eq!(ok.exists, Some(true));
    assert!(ok.accessible);
    assert_eq!(ok.private, Some(true));
    assert!(ok.is_reachable());

    let missing = publisher
        .check_repository(&RepositoryRef::new("octo", "missing"))
        .await;
    assert_eq!(missing.exists, Some(false));
    assert!(!missing.accessible);

    let locked = publisher
        .check_repository(&RepositoryRef::new("octo", "locked"))
        .await;
    assert_eq!(locked.exists, Some(true));
    assert!(!locked.accessible);
    assert_eq!(locked.private, Some(true));

    let flaky = publisher
        .check_repository(&RepositoryRef::new("octo", "flaky"))
        .await;
    assert_eq!(flaky.exists, None);
    assert!(!flaky.accessible);
    assert!(flaky.message.contains("502"));
}

#[tokio::test]
async fn test_check_repository_without_token_is_unknown() {
    let server = MockServer::start().await;
    let publisher = RepositorySecretPublisher::with_api_url(
        Arc::new(BrokenTokens),
        Url::parse(&server.uri()).unwrap(),
    );

    let status = publisher.check_repository(&repo()).await;

    assert_eq!(status.exists, None);
    assert!(!status.is_reachable());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_secret_names_collects_pages() {
    let server = MockServer::start().await;

    let first_page: Vec<_> = (0..100)
        .map(|i| serde_json::json!({ "name": format!("SECRET_{}", i) }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/repos/octo/infra/actions/secrets"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 101,
            "secrets": first_page
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/infra/actions/secrets"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 101,
            "secrets": [{ "name": "CLIENT_ID" }]
        })))
        .mount(&server)
        .await;

    let names = publisher(&server).list_secret_names(&repo()).await;

    assert_eq!(names.len(), 101);
    assert!(names.contains("CLIENT_ID"));
    assert!(names.contains("SECRET_99"));
}

#[tokio::test]
async fn test_list_failure_is_empty_set_but_strict_listing_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/infra/actions/secrets"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Resource not accessible"))
        .mount(&server)
        .await;

    let publisher = publisher(&server);

    assert!(publisher.list_secret_names(&repo()).await.is_empty());

    match publisher.list_repository_secrets(&repo()).await {
        Err(RepoError::ResourceLookup { status, .. }) => assert_eq!(status, Some(403)),
        other => panic!("Expected ResourceLookup error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_seals_value_for_repository_key() {
    let server = MockServer::start().await;
    let (secret_key, public_key) = common::repository_keypair();

    common::mount_public_key(&server, "octo", "infra", &public_key).await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/infra/actions/secrets/CLIENT_ID"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = publisher(&server)
        .publish(&repo(), "CLIENT_ID", "00000000-client")
        .await;
    assert_eq!(outcome, PublishOutcome::Created);

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&put.body).unwrap();

    assert_eq!(body["key_id"], "key-1");
    let encrypted = body["encrypted_value"].as_str().unwrap();
    assert_ne!(encrypted, "00000000-client");
    assert_eq!(common::unseal(&secret_key, encrypted), "00000000-client");
}

#[tokio::test]
async fn test_publish_maps_status_codes() {
    let server = MockServer::start().await;
    let (_secret_key, public_key) = common::repository_keypair();

    common::mount_public_key(&server, "octo", "infra", &public_key).await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/infra/actions/secrets/TENANT_ID"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/infra/actions/secrets/BROKEN"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Unprocessable"))
        .mount(&server)
        .await;

    let publisher = publisher(&server);

    let updated = publisher.publish(&repo(), "TENANT_ID", "tenant").await;
    assert_eq!(updated, PublishOutcome::Updated);

    match publisher.publish(&repo(), "BROKEN", "x").await {
        PublishOutcome::Failed { reason } => assert!(reason.contains("422")),
        other => panic!("Expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_with_malformed_key_fails_without_write() {
    let server = MockServer::start().await;

    common::mount_public_key(&server, "octo", "infra", "not-a-key").await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/infra/actions/secrets/CLIENT_ID"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = publisher(&server).publish(&repo(), "CLIENT_ID", "x").await;

    assert!(matches!(outcome, PublishOutcome::Failed { .. }));
}
