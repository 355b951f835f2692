use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;

const CHAT_URI: &str = "/proxy/openai/v1/chat/completions";

fn chat_body() -> Vec<u8> {
    serde_json::to_vec(&json!({ "model": "gpt-4o-mini", "messages": [] })).unwrap()
}

async fn ready_app(upstream: &MockServer) -> (TestApp, License, String) {
    let app = spawn_app(proxy_config(&upstream.uri()));
    let license = app.issue("pro");
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;
    (app, license, proxy_key)
}

#[tokio::test]
async fn test_signed_call_is_forwarded_with_provider_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(query_param("trace", "1"))
        .and(header("authorization", format!("Bearer {}", OPENAI_TEST_KEY).as_str()))
        .and(body_json(json!({ "model": "gpt-4o-mini", "messages": [] })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({ "id": "chatcmpl-1" })),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, license, proxy_key) = ready_app(&upstream).await;
    let body = chat_body();
    let (status, headers, response) = send(
        app.router(),
        signed_request(
            &format!("{}?trace=1", CHAT_URI),
            &proxy_key,
            "openai",
            &body,
            now(),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["id"], "chatcmpl-1");
    assert_eq!(headers["x-request-id"], "req-42");
    assert_eq!(headers["x-ratelimit-limit"], "500");
    assert_eq!(headers["x-ratelimit-remaining"], "499");
    assert!(headers.contains_key("x-ratelimit-reset"));
    assert_eq!(app.usage_today(&license.key), 1);
}

#[tokio::test]
async fn test_client_credentials_are_not_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let (app, _, proxy_key) = ready_app(&upstream).await;
    let (status, _, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded = &received[0].headers;
    assert_eq!(
        forwarded["authorization"],
        format!("Bearer {}", OPENAI_TEST_KEY).as_str()
    );
    assert!(!forwarded.contains_key("x-signature"));
    assert!(!forwarded.contains_key("x-timestamp"));
}

#[tokio::test]
async fn test_upstream_error_is_relayed_and_charged() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": { "message": "boom" } })),
        )
        .mount(&upstream)
        .await;

    let (app, license, proxy_key) = ready_app(&upstream).await;
    let (status, _, body) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "boom");
    assert_eq!(app.usage_today(&license.key), 1);
}

#[tokio::test]
async fn test_bad_signatures_are_rejected_before_forwarding() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let (app, license, proxy_key) = ready_app(&upstream).await;
    let body = chat_body();

    // signed for another provider
    let mut request = signed_request(CHAT_URI, &proxy_key, "anthropic", &body, now());
    let (status, _, response) = send(app.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "Invalid request signature");

    // stale timestamp
    request = signed_request(CHAT_URI, &proxy_key, "openai", &body, now() - 3600);
    let (status, _, response) = send(app.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "Request timestamp expired");

    // well-formed but unknown credential
    let forged = "px_0000000000000000000000000000000000000000000000000000000000000000";
    request = signed_request(CHAT_URI, forged, "openai", &body, now());
    let (status, _, _) = send(app.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // no credential at all
    let (status, _, _) = send(
        app.router(),
        json_request(axum::http::Method::POST, CHAT_URI, &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.usage_today(&license.key), 0);
}

#[tokio::test]
async fn test_revoked_credentials_stop_working() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let (app, license, proxy_key) = ready_app(&upstream).await;
    let body = chat_body();

    let (status, _, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &body, now()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    {
        let mut conn = app.state.db.get().unwrap();
        queries::reset_activations(&mut conn, &license.key).unwrap();
    }
    let (status, _, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &body, now()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_license_is_forbidden() {
    let upstream = MockServer::start().await;
    let (app, license, proxy_key) = ready_app(&upstream).await;

    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "UPDATE licenses SET expires_at = ?1 WHERE key = ?2",
            rusqlite::params![now() - 60, license.key],
        )
        .unwrap();
    }

    let (status, _, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.usage_today(&license.key), 0);
}

#[tokio::test]
async fn test_missing_activation_is_unauthorized() {
    let upstream = MockServer::start().await;
    let (app, license, proxy_key) = ready_app(&upstream).await;

    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "DELETE FROM activations WHERE license_key = ?1",
            rusqlite::params![license.key],
        )
        .unwrap();
    }

    let (status, _, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_daily_quota_blocks_further_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&upstream)
        .await;

    let app = spawn_app(proxy_config(&upstream.uri()));
    let license = app.issue_with_limits("pro", TierLimits::new(2, 100, 3));
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;
    let body = chat_body();

    for remaining in ["1", "0"] {
        let (status, headers, _) = send(
            app.router(),
            signed_request(CHAT_URI, &proxy_key, "openai", &body, now()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ratelimit-remaining"], remaining);
    }

    let (status, headers, response) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &body, now()),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response["error"]["code"], "daily_limit_exceeded");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert!(headers.contains_key("retry-after"));
    assert_eq!(app.usage_today(&license.key), 2);
}

#[tokio::test]
async fn test_unlimited_tier_reports_unlimited() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let app = spawn_app(proxy_config(&upstream.uri()));
    let license = app.issue("business");
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;

    let (status, headers, _) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-ratelimit-limit"], "unlimited");
    assert_eq!(headers["x-ratelimit-remaining"], "unlimited");
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&upstream)
        .await;

    let mut config = proxy_config(&upstream.uri());
    config.upstream_timeout_secs = 1;
    let app = spawn_app(config);
    let license = app.issue("pro");
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;

    let (status, _, body) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "upstream_timeout");
    assert_eq!(app.usage_today(&license.key), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_is_unavailable() {
    let app = spawn_app(proxy_config("http://127.0.0.1:1"));
    let license = app.issue("pro");
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;

    let (status, _, body) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &chat_body(), now()),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "upstream_unavailable");
}

#[tokio::test]
async fn test_unknown_or_disabled_provider_is_not_charged() {
    let upstream = MockServer::start().await;
    let (app, license, proxy_key) = ready_app(&upstream).await;
    let body = chat_body();

    for provider in ["mistral", "anthropic"] {
        let (status, _, _) = send(
            app.router(),
            signed_request(
                &format!("/proxy/{}/v1/messages", provider),
                &proxy_key,
                provider,
                &body,
                now(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "provider {}", provider);
    }
    assert_eq!(app.usage_today(&license.key), 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let upstream = MockServer::start().await;
    let mut config = proxy_config(&upstream.uri());
    config.max_body_bytes = 64;
    let app = spawn_app(config);
    let license = app.issue("pro");
    let proxy_key = proxy_key_for(&app, &license.key, "hw-1").await;

    let body = vec![b'a'; 1024];
    let (status, _, response) = send(
        app.router(),
        signed_request(CHAT_URI, &proxy_key, "openai", &body, now()),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response["code"], "payload_too_large");
    assert_eq!(app.usage_today(&license.key), 0);
}
