mod licenses;
mod tiers;

pub use licenses::*;
pub use tiers::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/licenses", post(create_license))
        .route("/admin/licenses/{key}", get(get_license))
        .route("/admin/licenses/{key}/deactivate", post(deactivate_license))
        .route("/admin/licenses/{key}/reset", post(reset_license))
        .route("/admin/licenses/{key}/upgrade", post(upgrade_license))
        .route("/admin/licenses/{key}/fix", post(fix_license))
        .route("/admin/tiers", get(list_tiers))
        .route("/admin/tiers/reload", post(reload_tiers))
        .route("/admin/tiers/{name}/migrate", post(migrate_tier))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}
