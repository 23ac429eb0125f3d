pub mod audit;
pub mod authz;
pub mod departments;
pub mod health;
pub mod modules;
pub mod roles;
pub mod users;

use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{load_directory, load_principal, Directory, PermissionEngine, Principal};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;

/// Resolve the caller's principal. A token for an unknown or deactivated
/// user is treated as unauthenticated.
pub(crate) async fn principal_for(state: &AppState, auth: &AuthUser) -> AppResult<Principal> {
    load_principal(&state.pool, &state.authz_cache, auth.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("unknown or inactive user"))
}

/// Authorization gate for handlers. Denials are a bare 403; no detail
/// about *why* is leaked, to avoid permission probing. Returns the loaded
/// snapshot so handlers can keep using it.
pub(crate) async fn require(
    state: &AppState,
    auth: &AuthUser,
    permission: &str,
    department_id: Option<Uuid>,
) -> AppResult<(Principal, Directory)> {
    let principal = principal_for(state, auth).await?;
    let directory = load_directory(&state.pool).await?;
    let engine = PermissionEngine::new(&directory);

    if !engine.has_scoped_permission(&principal, permission, department_id) {
        tracing::debug!(user_id = %auth.user_id, permission, "request denied");
        return Err(AppError::Forbidden);
    }

    Ok((principal, directory))
}
