//! The boolean authorization check consumed by middleware and UI callers.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{load_directory, PermissionEngine};
use crate::errors::AppError;
use crate::jwt::AuthUser;

use super::principal_for;

pub fn routes() -> Router<AppState> {
    Router::new().route("/check", get(check))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckQuery {
    #[schema(example = "users.edit")]
    pub permission: String,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckResponse {
    pub allowed: bool,
}

/// Evaluate "can the caller do `permission`, optionally within a
/// department?". Always 200 with a boolean; the decision itself is the
/// payload, enforcement is the caller's job.
#[utoipa::path(
    get,
    path = "/authz/check",
    tag = "Authz",
    params(
        ("permission" = String, Query, description = "Permission name"),
        ("department_id" = Option<Uuid>, Query, description = "Optional department scope"),
    ),
    responses((status = 200, description = "Authorization decision", body = CheckResponse)),
    security(("bearerAuth" = []))
)]
async fn check(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, AppError> {
    let principal = principal_for(&state, &auth).await?;
    let directory = load_directory(&state.pool).await?;
    let engine = PermissionEngine::new(&directory);

    let allowed = engine.has_scoped_permission(&principal, &query.permission, query.department_id);

    Ok(Json(CheckResponse { allowed }))
}
