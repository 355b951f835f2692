use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};

use crate::common::*;

async fn admin(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, body) = send(app.router(), admin_request(method, uri, body.as_ref())).await;
    (status, body)
}

#[tokio::test]
async fn test_admin_requires_token() {
    let app = spawn_app(test_config(GatewayMode::Proxy));

    let (status, _, _) = send(
        app.router(),
        Request::builder()
            .uri("/admin/tiers")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(
        app.router(),
        Request::builder()
            .uri("/admin/tiers")
            .header("authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid admin token");
}

#[tokio::test]
async fn test_admin_routes_absent_without_token() {
    let mut config = test_config(GatewayMode::Proxy);
    config.admin_token = None;
    let app = spawn_app(config);

    let (status, _) = admin(&app, Method::GET, "/admin/tiers", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_and_inspect_license() {
    let app = spawn_app(test_config(GatewayMode::Direct));

    let (status, created) = admin(
        &app,
        Method::POST,
        "/admin/licenses",
        Some(json!({
            "customer_name": "Ada",
            "customer_email": "Ada@Example.com",
            "tier": "pro",
            "period": "YEAR",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    let key = created["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("LIC-YEAR-"));
    assert_eq!(created["daily_limit"], 500);
    assert_eq!(created["customer_email"], "ada@example.com");
    assert!(created.get("salt").is_none());

    let (status, info) = admin(&app, Method::GET, &format!("/admin/licenses/{}", key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["state"], "issued");
    assert_eq!(info["effective_tier"], "pro");
    assert_eq!(info["activations"].as_array().unwrap().len(), 0);

    activate(&app, &key, "hw-1").await;
    let (_, info) = admin(&app, Method::GET, &format!("/admin/licenses/{}", key), None).await;
    assert_eq!(info["state"], "activated");
    assert_eq!(info["activations"][0]["hardware_id"], "hw-1");
    assert!(info["activations"][0]["last_checkin_at"].is_i64());
    assert_eq!(info["usage"]["daily"], 0);
}

#[tokio::test]
async fn test_create_rejects_unsellable_tiers() {
    let app = spawn_app(test_config(GatewayMode::Proxy));

    let (status, body) = admin(
        &app,
        Method::POST,
        "/admin/licenses",
        Some(json!({ "tier": "tier-1", "period": "MONTH" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("tier-11"));

    let (status, _) = admin(
        &app,
        Method::POST,
        "/admin/licenses",
        Some(json!({ "tier": "platinum", "period": "MONTH" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deactivate_license() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("pro");

    let (status, _) = admin(
        &app,
        Method::POST,
        &format!("/admin/licenses/{}/deactivate", license.key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.license(&license.key).active);

    let (status, _) = activate(&app, &license.key, "hw-1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = admin(
        &app,
        Method::POST,
        "/admin/licenses/LIC-YEAR-NOPE-NOPE/deactivate",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reset_frees_device_slots() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("free");
    activate(&app, &license.key, "hw-old").await;

    let (status, _) = activate(&app, &license.key, "hw-new").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = admin(
        &app,
        Method::POST,
        &format!("/admin/licenses/{}/reset", license.key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (status, _) = activate(&app, &license.key, "hw-new").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_upgrade_license() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("pro");

    let (status, body) = admin(
        &app,
        Method::POST,
        &format!("/admin/licenses/{}/upgrade", license.key),
        Some(json!({ "tier": "business" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "business");
    assert_eq!(body["daily_limit"], -1);
    assert_eq!(body["max_activations"], 10);

    let (status, _) = admin(
        &app,
        Method::POST,
        &format!("/admin/licenses/{}/upgrade", license.key),
        Some(json!({ "tier": "tier-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_fix_collapses_deprecated_tier_and_heals_salt() {
    let app = spawn_app(test_config(GatewayMode::Direct));
    let license = app.issue("tier-1");
    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "UPDATE licenses SET salt = NULL WHERE key = ?1",
            rusqlite::params![license.key],
        )
        .unwrap();
    }

    let (status, body) = admin(
        &app,
        Method::POST,
        &format!("/admin/licenses/{}/fix", license.key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "tier-11");
    assert_eq!(body["daily_limit"], 50);
    assert_eq!(body["max_activations"], 2);

    let fixed = app.license(&license.key);
    assert_eq!(fixed.salt.map(|s| s.len()), Some(64));
}

#[tokio::test]
async fn test_list_tiers_shows_effective_limits() {
    let app = spawn_app(test_config(GatewayMode::Proxy));

    let (status, body) = admin(&app, Method::GET, "/admin/tiers", None).await;
    assert_eq!(status, StatusCode::OK);
    let tiers = body.as_array().unwrap();
    assert_eq!(tiers.len(), 5);

    let legacy = tiers.iter().find(|t| t["id"] == "tier-1").unwrap();
    assert_eq!(legacy["deprecated"], true);
    assert_eq!(legacy["daily_limit"], 5);
    assert_eq!(legacy["effective_limits"]["daily"], 50);
}

#[tokio::test]
async fn test_reload_keeps_table_on_bad_file() {
    let app = spawn_app(test_config(GatewayMode::Proxy));

    std::fs::write(app.tiers_path(), "[tiers.broken]\ndaily_limit = \"lots\"\n").unwrap();
    let (status, _) = admin(&app, Method::POST, "/admin/tiers/reload", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.state.tiers.current().len(), 5);

    let extended = format!(
        "{}\n[tiers.team]\nname = \"Team\"\ndaily_limit = 1000\nmonthly_limit = 20000\nmax_devices = 25\n",
        TEST_TIERS
    );
    std::fs::write(app.tiers_path(), extended).unwrap();
    let (status, body) = admin(&app, Method::POST, "/admin/tiers/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tiers"], 6);
    assert!(app.state.tiers.current().exists("team"));
}

#[tokio::test]
async fn test_migrate_deprecated_tier() {
    let app = spawn_app(test_config(GatewayMode::Proxy));
    let first = app.issue("tier-1");
    let second = app.issue("tier-1");
    app.issue("pro");

    let (status, body) = admin(&app, Method::POST, "/admin/tiers/tier-1/migrate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["to"], "tier-11");
    assert_eq!(body["migrated"], 2);

    for key in [&first.key, &second.key] {
        let license = app.license(key);
        assert_eq!(license.tier, "tier-11");
        assert_eq!(license.daily_limit, 50);
    }

    let (status, _) = admin(&app, Method::POST, "/admin/tiers/pro/migrate", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
