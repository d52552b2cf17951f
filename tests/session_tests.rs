use std::time::Duration;

use serde_json::json;
use tuya_cloud::{CloudClient, Credentials, Error, Region, SessionState};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials() -> Credentials {
    Credentials::new("user@example.com", "secret", "31", "smart_life")
}

fn grant(access: &str, refresh: &str, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": expires_in,
    })
}

fn client(server: &MockServer) -> CloudClient {
    CloudClient::builder()
        .base_url(server.uri())
        .credentials(credentials())
        .build()
        .expect("client should build")
}

#[tokio::test]
async fn auth_form_carries_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .and(body_string_contains("userName=user%40example.com"))
        .and(body_string_contains("countryCode=31"))
        .and(body_string_contains("bizType=smart_life"))
        .and(body_string_contains("from=tuya"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa", "EUr", 7200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.session().ensure_valid_token().await.unwrap();
    assert_eq!(client.session().state().await, SessionState::Authenticated);
}

#[tokio::test]
async fn repeated_calls_authenticate_once_within_guard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa", "EUr", 7200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let session = client.session();
    let (a, b, c) = tokio::join!(
        session.ensure_valid_token(),
        session.ensure_valid_token(),
        session.ensure_valid_token(),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    for _ in 0..5 {
        session.ensure_valid_token().await.unwrap();
    }
}

#[tokio::test]
async fn expired_token_within_guard_is_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa", "EUr", 0)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.session().ensure_valid_token().await.unwrap();
    match client.session().ensure_valid_token().await {
        Err(Error::AuthThrottled { retry_in }) => {
            assert!(retry_in <= Duration::from_secs(65));
        }
        other => panic!("expected throttling, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_credentials_are_fatal_until_reinitialized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "error",
            "errorMsg": "Get accesstoken failed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    match client.session().ensure_valid_token().await {
        Err(Error::Session { message, fatal }) => {
            assert!(fatal);
            assert_eq!(message, "Get accesstoken failed");
        }
        other => panic!("expected fatal session error, got {other:?}"),
    }
    assert_eq!(client.session().state().await, SessionState::Error);
    assert_eq!(
        client.session().last_error().await.as_deref(),
        Some("Get accesstoken failed")
    );

    // No second request while in the error state.
    let err = client.session().ensure_valid_token().await.unwrap_err();
    assert!(!err.is_transient());

    client.initialize(credentials()).await.unwrap();
    assert_eq!(client.session().state().await, SessionState::Uninitialized);
}

#[tokio::test]
async fn cloud_rate_limit_message_is_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "error",
            "errorMsg": "you cannot auth exceed once in 60 seconds"
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.session().ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, Error::Session { fatal: false, .. }));
    assert!(err.is_transient());
    assert_eq!(client.session().state().await, SessionState::Uninitialized);
}

#[tokio::test]
async fn transport_failure_leaves_session_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.session().ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    assert!(err.is_transient());
    assert_eq!(client.session().state().await, SessionState::Uninitialized);
}

#[tokio::test]
async fn region_follows_token_but_fixed_base_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("AYaccess", "AYrefresh", 7200)))
        .mount(&server)
        .await;

    let client = client(&server);
    client.session().ensure_valid_token().await.unwrap();
    assert_eq!(client.session().session().await.region, Region::Cn);
    assert_eq!(client.session().base_url().await, server.uri());
}

#[tokio::test]
async fn expiring_token_uses_refresh_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa1", "EUr1", 30)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/access.do"))
        .and(query_param("grant_type", "refresh_token"))
        .and(query_param("refresh_token", "EUr1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa2", "EUr2", 7200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::builder()
        .base_url(server.uri())
        .credentials(credentials())
        .auth_guard(Duration::ZERO)
        .build()
        .unwrap();
    let session = client.session();
    session.ensure_valid_token().await.unwrap();
    // 30 s left is inside the refresh margin.
    session.ensure_valid_token().await.unwrap();
    assert_eq!(session.session().await.access_token, "EUa2");
    session.ensure_valid_token().await.unwrap();
}

#[tokio::test]
async fn failed_refresh_falls_back_to_full_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("EUa", "EUr", 30)))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/access.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "error",
            "errorMsg": "refresh token expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::builder()
        .base_url(server.uri())
        .credentials(credentials())
        .auth_guard(Duration::ZERO)
        .build()
        .unwrap();
    client.session().ensure_valid_token().await.unwrap();
    client.session().ensure_valid_token().await.unwrap();
    assert_eq!(client.session().state().await, SessionState::Authenticated);
}

#[tokio::test]
async fn unanswered_auth_still_counts_towards_guard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth.do"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let session = client.session();
    assert!(matches!(session.ensure_valid_token().await, Err(Error::Http(_))));
    for _ in 0..3 {
        assert!(matches!(
            session.ensure_valid_token().await,
            Err(Error::AuthThrottled { .. })
        ));
    }
}
