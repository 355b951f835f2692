mod activate;
mod usage;
mod verify;

pub use activate::*;
pub use usage::*;
pub use verify::*;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use crate::config::GatewayMode;
use crate::db::AppState;
use crate::extractors::Json;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    mode: GatewayMode,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.config.mode,
    })
}

pub fn router(mode: GatewayMode) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health))
        .route("/activate", post(activate))
        .route("/verify/request", post(request_code))
        .route("/verify/confirm", post(confirm_code));

    match mode {
        GatewayMode::Direct => router.route("/usage", post(report_usage)),
        GatewayMode::Proxy => router,
    }
}
