//! Role and permission administration. All mutations here reshape the
//! role-permission store, so each one clears the principal cache before
//! returning and lands in the audit log with Critical severity.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::permissions as perm;
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::*;

use super::require;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:role_id", get(get_role).delete(delete_role))
        .route(
            "/:role_id/permissions",
            get(get_role_permissions).post(assign_permission),
        )
        .route("/:role_id/permissions/:permission_id", delete(revoke_permission))
}

pub fn permission_routes() -> Router<AppState> {
    Router::new().route("/", get(list_permissions).post(create_permission))
}

pub(crate) fn role_from_row(row: &sqlx::sqlite::SqliteRow) -> Role {
    Role {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        guard: row.get("guard"),
        level: row.get("level"),
        active: row.get("active"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn permission_from_row(row: &sqlx::sqlite::SqliteRow) -> Permission {
    Permission {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const ROLE_COLUMNS: &str = "id, name, guard, level, active, description, created_at, updated_at";

#[utoipa::path(
    get,
    path = "/roles",
    tag = "RBAC",
    responses((status = 200, description = "List of roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Role>>, AppError> {
    require(&state, &auth, perm::ROLES_VIEW, None).await?;

    let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows.iter().map(role_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists in guard"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    require(&state, &auth, perm::ROLES_MANAGE, None).await?;

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO roles (id, name, guard, level, active, description, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&req.name)
    .bind(&req.guard)
    .bind(req.level)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("Role name already exists in this guard")
        }
        other => AppError::from(other),
    })?;

    let role = Role {
        id,
        name: req.name,
        guard: req.guard,
        level: req.level,
        active: true,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &role, None);

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Role>, AppError> {
    require(&state, &auth, perm::ROLES_VIEW, None).await?;

    let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
        .bind(role_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Role not found"))?;

    Ok(Json(role_from_row(&row)))
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require(&state, &auth, perm::ROLES_MANAGE, None).await?;

    let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
        .bind(role_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Role not found"))?;
    let role = role_from_row(&row);

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz_cache.clear();
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &role, None);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses((status = 200, description = "Assigned permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, AppError> {
    require(&state, &auth, perm::ROLES_VIEW, None).await?;

    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.description, p.created_at, p.updated_at
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.iter().map(permission_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = AssignPermissionToRoleRequest,
    responses((status = 201, description = "Permission assigned")),
    security(("bearerAuth" = []))
)]
async fn assign_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> Result<StatusCode, AppError> {
    require(&state, &auth, perm::ROLES_MANAGE, None).await?;

    let now = Utc::now();
    sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(req.permission_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?;

    // the read cache must never outlive a grant change
    state.authz_cache.clear();

    let assignment = RolePermission {
        role_id,
        permission_id: req.permission_id,
        created_at: now,
    };
    log_activity(&state.event_bus, "assigned", Some(auth.user_id), &assignment, None);

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses((status = 204, description = "Permission removed from role")),
    security(("bearerAuth" = []))
)]
async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    require(&state, &auth, perm::ROLES_MANAGE, None).await?;

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz_cache.clear();

    let assignment = RolePermission {
        role_id,
        permission_id,
        created_at: Utc::now(),
    };
    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &assignment, None);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/permissions",
    tag = "RBAC",
    responses((status = 200, description = "List of permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Permission>>, AppError> {
    require(&state, &auth, perm::ROLES_VIEW, None).await?;

    let rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM permissions ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.iter().map(permission_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission name already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PermissionCreateRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    require(&state, &auth, perm::ROLES_MANAGE, None).await?;

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO permissions (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&req.name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("Permission name already exists")
        }
        other => AppError::from(other),
    })?;

    let permission = Permission {
        id,
        name: req.name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &permission, None);

    Ok((StatusCode::CREATED, Json(permission)))
}
