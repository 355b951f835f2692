use axum::extract::State;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::tiers::{TierDefinition, TierLimits};

#[derive(Debug, Serialize)]
pub struct TierSummary {
    pub id: String,
    #[serde(flatten)]
    pub definition: TierDefinition,
    /// Limits after the deprecation redirect
    pub effective_limits: TierLimits,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub tiers: usize,
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub success: bool,
    pub from: String,
    pub to: String,
    pub migrated: usize,
}

pub async fn list_tiers(State(state): State<AppState>) -> Result<Json<Vec<TierSummary>>> {
    let table = state.tiers.current();
    let tiers = table
        .iter()
        .map(|(id, definition)| -> Result<TierSummary> {
            Ok(TierSummary {
                id: id.to_string(),
                definition: definition.clone(),
                effective_limits: table.resolve(id)?.limits,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(tiers))
}

pub async fn reload_tiers(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let table = state
        .tiers
        .reload()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(ReloadResponse {
        success: true,
        tiers: table.len(),
    }))
}

/// Move every license on a deprecated tier onto its replacement.
pub async fn migrate_tier(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MigrateResponse>> {
    let table = state.tiers.current();
    let target = table.migration_target(&name)?;
    let limits = table.raw(target)?.limits();

    let conn = state.db.get()?;
    let migrated = queries::migrate_licenses(&conn, &name, target, limits)?;
    tracing::info!(from = %name, to = %target, migrated, "Tier migrated");

    Ok(Json(MigrateResponse {
        success: true,
        from: name.clone(),
        to: target.to_string(),
        migrated,
    }))
}
