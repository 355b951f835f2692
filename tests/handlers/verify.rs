use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;

async fn post(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, _, body) = send(app.router(), json_request(Method::POST, uri, &body)).await;
    (status, body)
}

/// Start a mailer webhook and an app that posts codes to it.
async fn app_with_mailer() -> (TestApp, MockServer) {
    let mailer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mail"))
        .and(header("x-keygate-event", "verification_code_created"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&mailer)
        .await;

    let mut config = test_config(GatewayMode::Proxy);
    config.verification_webhook_url = Some(format!("{}/mail", mailer.uri()));
    (spawn_app(config), mailer)
}

/// The code carried by the most recent webhook call.
async fn last_code(mailer: &MockServer) -> String {
    let received = mailer.received_requests().await.unwrap();
    let payload: Value = serde_json::from_slice(&received.last().unwrap().body).unwrap();
    payload["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_verification_issues_free_license() {
    let (app, mailer) = app_with_mailer().await;

    let (status, body) = post(
        &app,
        "/verify/request",
        json!({ "email": "  Dev@Example.COM ", "tier": "free" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["sent"], true);

    let received = mailer.received_requests().await.unwrap();
    let payload: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(payload["email"], "dev@example.com");
    assert_eq!(payload["tier"], "free");
    assert_eq!(payload["expires_in_minutes"], 15);

    let code = last_code(&mailer).await;
    let (status, body) = post(
        &app,
        "/verify/confirm",
        json!({ "email": "dev@example.com", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["tier"], "free");

    let license = app.license(body["license_key"].as_str().unwrap());
    assert_eq!(license.customer_email.as_deref(), Some("dev@example.com"));
    assert_eq!(license.daily_limit, 10);
    assert!(license.salt.is_some());

    // codes are single use
    let (status, _) = post(
        &app,
        "/verify/confirm",
        json!({ "email": "dev@example.com", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_one_free_license_per_email() {
    let (app, mailer) = app_with_mailer().await;

    for expected in [StatusCode::OK, StatusCode::CONFLICT] {
        post(
            &app,
            "/verify/request",
            json!({ "email": "solo@example.com", "tier": "free" }),
        )
        .await;
        let code = last_code(&mailer).await;
        let (status, body) = post(
            &app,
            "/verify/confirm",
            json!({ "email": "solo@example.com", "code": code }),
        )
        .await;
        assert_eq!(status, expected, "{}", body);
    }
}

#[tokio::test]
async fn test_newer_code_replaces_older_one() {
    let (app, mailer) = app_with_mailer().await;
    let request = json!({ "email": "twice@example.com", "tier": "free" });

    post(&app, "/verify/request", request.clone()).await;
    let first = last_code(&mailer).await;
    post(&app, "/verify/request", request).await;
    let second = last_code(&mailer).await;

    if first != second {
        let (status, _) = post(
            &app,
            "/verify/confirm",
            json!({ "email": "twice@example.com", "code": first }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = post(
        &app,
        "/verify/confirm",
        json!({ "email": "twice@example.com", "code": second }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_wrong_email_or_code_is_unauthorized() {
    let (app, mailer) = app_with_mailer().await;
    post(
        &app,
        "/verify/request",
        json!({ "email": "owner@example.com", "tier": "free" }),
    )
    .await;
    let code = last_code(&mailer).await;

    let (status, _) = post(
        &app,
        "/verify/confirm",
        json!({ "email": "intruder@example.com", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_rejects_ineligible_tiers() {
    let app = spawn_app(test_config(GatewayMode::Proxy));

    let (status, _) = post(
        &app,
        "/verify/request",
        json!({ "email": "a@example.com", "tier": "pro" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post(
        &app,
        "/verify/request",
        json!({ "email": "a@example.com", "tier": "tier-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post(
        &app,
        "/verify/request",
        json!({ "email": "a@example.com", "tier": "platinum" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(
        &app,
        "/verify/request",
        json!({ "email": "not-an-email", "tier": "free" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_succeeds_without_webhook() {
    let app = spawn_app(test_config(GatewayMode::Proxy));
    let (status, body) = post(
        &app,
        "/verify/request",
        json!({ "email": "quiet@example.com", "tier": "free" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], true);
}

#[tokio::test]
async fn test_code_stops_working_after_repeated_wrong_guesses() {
    let (app, mailer) = app_with_mailer().await;

    let (status, _) = post(
        &app,
        "/verify/request",
        json!({ "email": "guesser@example.com", "tier": "free" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = last_code(&mailer).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..queries::MAX_CODE_ATTEMPTS {
        let (status, _) = post(
            &app,
            "/verify/confirm",
            json!({ "email": "guesser@example.com", "code": wrong }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = post(
        &app,
        "/verify/confirm",
        json!({ "email": "guesser@example.com", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
