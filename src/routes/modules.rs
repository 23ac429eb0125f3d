//! Module lifecycle commands. Unlike authorization denials, lifecycle
//! failures surface their full reason string: these are admin-only
//! operations where the detail aids operational debugging.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::Row;

use crate::app::AppState;
use crate::authz::permissions as perm;
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::models::module::{LifecycleResponse, ModuleRecord};
use crate::modules::{ModuleError, ModuleManifest, NavEntry};

use super::{principal_for, require};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_modules))
        .route("/navigation", get(navigation))
        .route("/records", get(list_records))
        .route("/:name/access", get(module_access))
        .route("/:name/enable", post(enable_module))
        .route("/:name/disable", post(disable_module))
        .route("/cache/clear", post(clear_cache))
}

fn lifecycle_outcome(result: Result<(), ModuleError>, ok_message: String)
    -> (StatusCode, Json<LifecycleResponse>)
{
    match result {
        Ok(()) => (StatusCode::OK, Json(LifecycleResponse::ok(ok_message))),
        Err(err @ (ModuleError::Io(_) | ModuleError::Database(_))) => {
            tracing::error!("module lifecycle failure: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LifecycleResponse::err("internal error")),
            )
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(LifecycleResponse::err(err.to_string()))),
    }
}

#[utoipa::path(
    get,
    path = "/modules",
    tag = "Modules",
    responses((status = 200, description = "All module definitions", body = Vec<ModuleManifest>)),
    security(("bearerAuth" = []))
)]
async fn list_modules(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ModuleManifest>>, AppError> {
    require(&state, &auth, perm::MODULES_VIEW, None).await?;

    let modules = state
        .registry
        .get_all()
        .map_err(|err| AppError::internal(err.to_string()))?;

    Ok(Json(modules))
}

/// The ordered navigation menu for the caller.
#[utoipa::path(
    get,
    path = "/modules/navigation",
    tag = "Modules",
    responses((status = 200, description = "Navigation entries", body = Vec<NavEntry>)),
    security(("bearerAuth" = []))
)]
async fn navigation(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<NavEntry>>, AppError> {
    let principal = principal_for(&state, &auth).await?;

    let entries = state
        .registry
        .navigation_for(&principal)
        .map_err(|err| AppError::internal(err.to_string()))?;

    Ok(Json(entries))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct AccessResponse {
    allowed: bool,
}

/// Coarse "can the caller see this module at all" check (OR over the
/// module's permission list).
#[utoipa::path(
    get,
    path = "/modules/{name}/access",
    tag = "Modules",
    params(("name" = String, Path, description = "Module name")),
    responses((status = 200, description = "Access decision", body = AccessResponse)),
    security(("bearerAuth" = []))
)]
async fn module_access(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<AccessResponse>, AppError> {
    let principal = principal_for(&state, &auth).await?;

    let allowed = state
        .registry
        .user_has_module_access(&principal, &name)
        .map_err(|err| AppError::internal(err.to_string()))?;

    Ok(Json(AccessResponse { allowed }))
}

#[utoipa::path(
    post,
    path = "/modules/{name}/enable",
    tag = "Modules",
    params(("name" = String, Path, description = "Module name")),
    responses(
        (status = 200, description = "Module enabled", body = LifecycleResponse),
        (status = 400, description = "Dependencies not met", body = LifecycleResponse),
    ),
    security(("bearerAuth" = []))
)]
async fn enable_module(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<LifecycleResponse>), AppError> {
    require(&state, &auth, perm::MODULES_MANAGE, None).await?;

    let result = state.registry.enable(&name, Some(auth.user_id)).await;
    Ok(lifecycle_outcome(result, format!("module '{name}' enabled")))
}

#[utoipa::path(
    post,
    path = "/modules/{name}/disable",
    tag = "Modules",
    params(("name" = String, Path, description = "Module name")),
    responses(
        (status = 200, description = "Module disabled", body = LifecycleResponse),
        (status = 400, description = "Critical in safe mode, or has active dependents", body = LifecycleResponse),
    ),
    security(("bearerAuth" = []))
)]
async fn disable_module(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<LifecycleResponse>), AppError> {
    require(&state, &auth, perm::MODULES_MANAGE, None).await?;

    let result = state.registry.disable(&name, Some(auth.user_id)).await;
    Ok(lifecycle_outcome(result, format!("module '{name}' disabled")))
}

#[utoipa::path(
    post,
    path = "/modules/cache/clear",
    tag = "Modules",
    responses((status = 200, description = "Cache cleared", body = LifecycleResponse)),
    security(("bearerAuth" = []))
)]
async fn clear_cache(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<LifecycleResponse>, AppError> {
    require(&state, &auth, perm::MODULES_MANAGE, None).await?;

    state.registry.invalidate_cache();
    Ok(Json(LifecycleResponse::ok("module cache cleared")))
}

/// The mirror rows from the relational store - reporting only, the
/// descriptors on disk remain authoritative.
#[utoipa::path(
    get,
    path = "/modules/records",
    tag = "Modules",
    responses((status = 200, description = "Mirrored module records", body = Vec<ModuleRecord>)),
    security(("bearerAuth" = []))
)]
async fn list_records(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ModuleRecord>>, AppError> {
    require(&state, &auth, perm::MODULES_VIEW, None).await?;

    let rows = sqlx::query("SELECT name, active, version, updated_at FROM modules ORDER BY name")
        .fetch_all(&state.pool)
        .await?;

    let records: Vec<ModuleRecord> = rows
        .iter()
        .map(|row| ModuleRecord {
            name: row.get("name"),
            active: row.get("active"),
            version: row.get("version"),
            updated_at: row.get("updated_at"),
        })
        .collect();

    Ok(Json(records))
}
