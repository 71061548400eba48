//! Token Store Integration Tests
//!
//! Exercises access token caching, cross-process reuse through the cache
//! file, refresh on expiry, and approval key issuance against a mock KIS
//! OAuth server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kis_quote_stream::{AuthError, Credentials, FixedClock, TokenCache, TokenStore};

fn start_of_session() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn store(server: &MockServer, cache_path: &Path, clock: Arc<FixedClock>) -> TokenStore {
    TokenStore::new(
        reqwest::Client::new(),
        server.uri(),
        Credentials::new("app-key".to_string(), "app-secret".to_string()),
        TokenCache::new(cache_path),
        clock,
    )
    .unwrap()
}

fn token_body(token: &str) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": 86_400
    })
}

#[tokio::test]
async fn token_is_requested_once_and_reused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .and(body_partial_json(json!({
            "grant_type": "client_credentials",
            "appkey": "app-key",
            "appsecret": "app-secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("token.json");
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &cache_path, clock);

    let first = tokens.get_access_token().await.unwrap();
    let second = tokens.get_access_token().await.unwrap();

    assert_eq!(first.as_str(), "tok-1");
    assert_eq!(second.as_str(), "tok-1");
    assert_eq!(first.expires_at(), start_of_session() + Duration::hours(12));
    assert!(cache_path.exists());
}

#[tokio::test]
async fn second_store_reads_token_from_cache_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("shared")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("token.json");
    let clock = Arc::new(FixedClock::new(start_of_session()));

    let process_a = store(&server, &cache_path, Arc::clone(&clock));
    let process_b = store(&server, &cache_path, clock);

    assert_eq!(process_a.get_access_token().await.unwrap().as_str(), "shared");
    assert_eq!(process_b.get_access_token().await.unwrap().as_str(), "shared");
    assert_eq!(process_b.load_cached().unwrap().as_str(), "shared");
}

#[tokio::test]
async fn expired_token_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-2")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &dir.path().join("token.json"), Arc::clone(&clock));

    assert_eq!(tokens.get_access_token().await.unwrap().as_str(), "tok-1");

    clock.advance(Duration::hours(12));
    let refreshed = tokens.get_access_token().await.unwrap();
    assert_eq!(refreshed.as_str(), "tok-2");
    assert_eq!(
        refreshed.expires_at(),
        start_of_session() + Duration::hours(24)
    );
}

#[tokio::test]
async fn declared_kst_expiry_is_honored() {
    let server = MockServer::start().await;
    // 2024-01-02 10:00:00 KST = 2024-01-02T01:00:00Z, one hour after "now".
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "short",
            "access_token_token_expired": "2024-01-02 10:00:00",
            "expires_in": 86_400
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &dir.path().join("token.json"), clock);

    let token = tokens.get_access_token().await.unwrap();
    assert_eq!(
        token.expires_at(),
        start_of_session() + Duration::hours(1) - Duration::seconds(60)
    );
}

#[tokio::test]
async fn rejected_request_leaves_cache_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(403).set_body_string("EGW00133"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("token.json");
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &cache_path, clock);

    let err = tokens.get_access_token().await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 403, .. }));
    assert!(!cache_path.exists());
    assert!(tokens.load_cached().is_none());
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("tok-1"))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = Arc::new(store(&server, &dir.path().join("token.json"), clock));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tokens = Arc::clone(&tokens);
            tokio::spawn(async move { tokens.get_access_token().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().as_str(), "tok-1");
    }
}

#[tokio::test]
async fn approval_key_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/Approval"))
        .and(body_partial_json(json!({
            "grant_type": "client_credentials",
            "appkey": "app-key",
            "secretkey": "app-secret"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"approval_key": "approve-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &dir.path().join("token.json"), clock);

    assert_eq!(tokens.get_approval_key().await.unwrap().as_str(), "approve-1");
    assert_eq!(tokens.get_approval_key().await.unwrap().as_str(), "approve-1");
}

#[tokio::test]
async fn approval_failure_is_retried_on_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/Approval"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/Approval"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"approval_key": "approve-2"})),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_of_session()));
    let tokens = store(&server, &dir.path().join("token.json"), clock);

    assert!(matches!(
        tokens.get_approval_key().await,
        Err(AuthError::Rejected { status: 500, .. })
    ));
    assert_eq!(tokens.get_approval_key().await.unwrap().as_str(), "approve-2");
}

#[test]
fn empty_credentials_are_rejected() {
    let result = TokenStore::new(
        reqwest::Client::new(),
        "http://127.0.0.1:9",
        Credentials::new(String::new(), "secret".to_string()),
        TokenCache::new("unused.json"),
        Arc::new(FixedClock::new(start_of_session())),
    );
    assert!(matches!(result, Err(AuthError::MissingCredentials)));
}
