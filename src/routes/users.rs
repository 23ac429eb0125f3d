//! User management endpoints. Every listing is filtered through the
//! resolution engine, so a department manager only ever sees the users
//! inside their managed subtree.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, permissions, PermissionEngine};
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{EffectivePermission, EffectivePermissions, Role};
use crate::models::user::{AssignRolesRequest, AssignRolesResponse, User, UserCreateRequest, UserUpdateRequest};

use super::{principal_for, require};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(deactivate_user))
        .route("/:id/roles", put(assign_roles).get(get_user_roles))
        .route("/:id/effective-permissions", get(effective_permissions))
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        email: row.get("email"),
        department_id: row
            .get::<Option<String>, _>("department_id")
            .and_then(|s| Uuid::parse_str(&s).ok()),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

async fn fetch_user(state: &AppState, id: Uuid) -> Result<User, AppError> {
    let row = sqlx::query(
        "SELECT id, name, email, department_id, active, created_at, updated_at, deleted_at
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(user_from_row(&row))
}

/// List the users the caller may manage. The engine decides the visible
/// set; there is no separate permission gate on top of it.
#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "Manageable users", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<User>>, AppError> {
    let principal = principal_for(&state, &auth).await?;
    let directory = authz::load_directory(&state.pool).await?;
    let engine = PermissionEngine::new(&directory);

    let visible: Vec<Uuid> = engine
        .manageable_users(&principal)
        .iter()
        .map(|u| u.id)
        .collect();

    let rows = sqlx::query(
        "SELECT id, name, email, department_id, active, created_at, updated_at, deleted_at
         FROM users WHERE deleted_at IS NULL ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let users: Vec<User> = rows
        .iter()
        .map(user_from_row)
        .filter(|user| visible.contains(&user.id))
        .collect();

    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = User),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    let principal = principal_for(&state, &auth).await?;

    if id != principal.user_id {
        let directory = authz::load_directory(&state.pool).await?;
        let engine = PermissionEngine::new(&directory);
        if !engine.can_manage_user(&principal, id) {
            return Err(AppError::Forbidden);
        }
    }

    Ok(Json(fetch_user(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already in use"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    require(&state, &auth, permissions::USERS_CREATE, req.department_id).await?;

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, department_id, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&req.name)
    .bind(&req.email)
    .bind(req.department_id.map(|d| d.to_string()))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("Email already in use")
        }
        other => AppError::from(other),
    })?;

    let user = User {
        id,
        name: req.name,
        email: req.email,
        department_id: req.department_id,
        active: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &user, None);

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UserUpdateRequest>,
) -> Result<Json<User>, AppError> {
    let old = fetch_user(&state, id).await?;
    let (principal, directory) =
        require(&state, &auth, permissions::USERS_EDIT, old.department_id).await?;

    let engine = PermissionEngine::new(&directory);
    if !engine.can_manage_user(&principal, id) {
        return Err(AppError::Forbidden);
    }

    let updated = User {
        name: req.name.unwrap_or(old.name.clone()),
        email: req.email.unwrap_or(old.email.clone()),
        department_id: req.department_id.or(old.department_id),
        updated_at: Utc::now(),
        ..old.clone()
    };

    sqlx::query("UPDATE users SET name = ?, email = ?, department_id = ?, updated_at = ? WHERE id = ?")
        .bind(&updated.name)
        .bind(&updated.email)
        .bind(updated.department_id.map(|d| d.to_string()))
        .bind(updated.updated_at)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    // department changes affect scoped resolution for this user
    state.authz_cache.invalidate(id);

    log_activity(&state.event_bus, "updated", Some(auth.user_id), &updated, Some(&old));

    Ok(Json(updated))
}

/// Soft-deactivation only; user rows are never hard-deleted.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deactivated"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn deactivate_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let old = fetch_user(&state, id).await?;
    let (principal, directory) =
        require(&state, &auth, permissions::USERS_DELETE, old.department_id).await?;

    let engine = PermissionEngine::new(&directory);
    if !engine.can_manage_user(&principal, id) {
        return Err(AppError::Forbidden);
    }

    let now = Utc::now();
    sqlx::query("UPDATE users SET active = 0, deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz_cache.invalidate(id);
    log_activity(&state.event_bus, "deactivated", Some(auth.user_id), &old, None);

    Ok(StatusCode::NO_CONTENT)
}

/// Replace the user's role set. The store strips any direct permission
/// grants in the same transaction (role-only policy) and reports failure
/// as `success: false` instead of an error status.
#[utoipa::path(
    put,
    path = "/users/{id}/roles",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AssignRolesRequest,
    responses((status = 200, description = "Assignment outcome", body = AssignRolesResponse)),
    security(("bearerAuth" = []))
)]
async fn assign_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<Json<AssignRolesResponse>, AppError> {
    require(&state, &auth, permissions::ROLES_MANAGE, None).await?;

    let target = fetch_user(&state, id).await?;
    let success = authz::assign_roles(&state.pool, &state.authz_cache, id, &req.role_ids).await;

    if success {
        log_activity(&state.event_bus, "roles_assigned", Some(auth.user_id), &target, None);
    }

    Ok(Json(AssignRolesResponse { success }))
}

#[utoipa::path(
    get,
    path = "/users/{id}/roles",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Assigned roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Role>>, AppError> {
    require(&state, &auth, permissions::ROLES_VIEW, None).await?;

    let rows = sqlx::query(
        r#"
        SELECT r.id, r.name, r.guard, r.level, r.active, r.description, r.created_at, r.updated_at
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let roles: Vec<Role> = rows.iter().map(super::roles::role_from_row).collect();

    Ok(Json(roles))
}

/// Computed effective permissions. Every entry names its source role;
/// there are no direct grants by policy.
#[utoipa::path(
    get,
    path = "/users/{id}/effective-permissions",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
async fn effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EffectivePermissions>, AppError> {
    if id != auth.user_id {
        require(&state, &auth, permissions::ROLES_VIEW, None).await?;
    }

    let role_rows = sqlx::query(
        r#"
        SELECT r.name
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let perm_rows = sqlx::query(
        r#"
        SELECT p.name AS permission_name, r.name AS role_name
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        INNER JOIN roles r ON r.id = rp.role_id
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(EffectivePermissions {
        user_id: id,
        roles: role_rows.iter().map(|r| r.get("name")).collect(),
        permissions: perm_rows
            .iter()
            .map(|r| EffectivePermission {
                name: r.get("permission_name"),
                role_name: r.get("role_name"),
            })
            .collect(),
    }))
}
