use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use crate::common::*;

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

async fn report(
    app: &TestApp,
    license_key: &str,
    hardware_id: &str,
    date: &str,
    scans: i64,
) -> (StatusCode, Value) {
    let (status, _, body) = send(
        app.router(),
        json_request(
            Method::POST,
            "/usage",
            &json!({
                "license_key": license_key,
                "hardware_id": hardware_id,
                "date": date,
                "scans": scans,
            }),
        ),
    )
    .await;
    (status, body)
}

#[tokio::test]
async fn test_usage_accumulates_until_daily_limit() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue_with_limits("pro", TierLimits::new(5, 100, 3));
    activate(&app, &license.key, "hw-1").await;

    let (status, body) = report(&app, &license.key, "hw-1", &today(), 3).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["daily_usage"], 3);
    assert_eq!(body["daily_limit"], 5);

    let (status, body) = report(&app, &license.key, "hw-1", &today(), 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["daily_usage"], 5);
    assert_eq!(body["monthly_usage"], 5);

    let (status, body) = report(&app, &license.key, "hw-1", &today(), 1).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "daily_limit_exceeded");
    assert_eq!(app.usage_today(&license.key), 5);
}

#[tokio::test]
async fn test_huge_scan_count_is_rejected_and_not_recorded() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue_with_limits("pro", TierLimits::new(10, 100, 3));
    activate(&app, &license.key, "hw-1").await;
    report(&app, &license.key, "hw-1", &today(), 5).await;

    let (status, _) = report(&app, &license.key, "hw-1", &today(), i64::MAX).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = report(&app, &license.key, "hw-1", &today(), 0).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["daily_usage"], 5);
    assert_eq!(app.usage_today(&license.key), 5);
}

#[tokio::test]
async fn test_zero_scans_reads_totals() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("pro");
    activate(&app, &license.key, "hw-1").await;
    report(&app, &license.key, "hw-1", &today(), 4).await;

    let (status, body) = report(&app, &license.key, "hw-1", &today(), 0).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["daily_usage"], 4);
    assert_eq!(body["tier"], "pro");
}

#[tokio::test]
async fn test_usage_rejects_bad_reports() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("pro");
    activate(&app, &license.key, "hw-1").await;

    let (status, _) = report(&app, &license.key, "hw-1", "not-a-date", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let far = (Utc::now().date_naive() - Duration::days(5))
        .format("%Y-%m-%d")
        .to_string();
    let (status, _) = report(&app, &license.key, "hw-1", &far, 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = report(&app, &license.key, "hw-1", &today(), -1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = report(&app, &license.key, "hw-unknown", &today(), 1).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = report(&app, "LIC-YEAR-NOPE-NOPE", "hw-1", &today(), 1).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_usage_route_absent_in_proxy_mode() {
    let app = spawn_app(test_config(GatewayMode::Proxy));
    let license = app.issue("pro");
    let (status, _) = report(&app, &license.key, "hw-1", &today(), 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
