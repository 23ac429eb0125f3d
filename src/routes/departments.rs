//! Department management. Structural invariants (no cycles, no deleting
//! non-empty departments) are enforced here before anything is persisted,
//! using the same arena the resolution engine traverses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, permissions as perm, PermissionEngine};
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::department::*;

use super::{principal_for, require};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route("/:id", get(get_department).put(update_department).delete(delete_department))
}

fn department_from_row(row: &sqlx::sqlite::SqliteRow) -> Department {
    Department {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        code: row.get("code"),
        parent_id: row
            .get::<Option<String>, _>("parent_id")
            .and_then(|s| Uuid::parse_str(&s).ok()),
        manager_id: row
            .get::<Option<String>, _>("manager_id")
            .and_then(|s| Uuid::parse_str(&s).ok()),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const DEPT_COLUMNS: &str = "id, name, code, parent_id, manager_id, active, created_at, updated_at";

async fn fetch_department(state: &AppState, id: Uuid) -> Result<Department, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {DEPT_COLUMNS} FROM departments WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Department not found"))?;

    Ok(department_from_row(&row))
}

/// List the departments accessible to the caller (everything for admins,
/// own + managed subtree otherwise).
#[utoipa::path(
    get,
    path = "/departments",
    tag = "Departments",
    responses((status = 200, description = "Accessible departments", body = Vec<Department>)),
    security(("bearerAuth" = []))
)]
async fn list_departments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Department>>, AppError> {
    let principal = principal_for(&state, &auth).await?;
    let directory = authz::load_directory(&state.pool).await?;
    let engine = PermissionEngine::new(&directory);
    let accessible = engine.accessible_departments(&principal);

    let rows = sqlx::query(&format!(
        "SELECT {DEPT_COLUMNS} FROM departments WHERE deleted_at IS NULL ORDER BY name"
    ))
    .fetch_all(&state.pool)
    .await?;

    let departments: Vec<Department> = rows
        .iter()
        .map(department_from_row)
        .filter(|dept| accessible.contains(&dept.id))
        .collect();

    Ok(Json(departments))
}

/// Detail view with the derived hierarchy properties (level, full path,
/// children, deletability).
#[utoipa::path(
    get,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department ID")),
    responses(
        (status = 200, description = "Department details", body = DepartmentDetail),
        (status = 404, description = "Department not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DepartmentDetail>, AppError> {
    let (_, directory) = require(&state, &auth, perm::DEPARTMENTS_VIEW, Some(id)).await?;

    let department = fetch_department(&state, id).await?;
    let arena = &directory.departments;

    Ok(Json(DepartmentDetail {
        level: arena.level(id),
        path: arena.hierarchy_path(id),
        children: arena.children(id),
        can_delete: directory.can_delete_department(id),
        department,
    }))
}

#[utoipa::path(
    post,
    path = "/departments",
    tag = "Departments",
    request_body = DepartmentCreateRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 409, description = "Department code already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DepartmentCreateRequest>,
) -> Result<(StatusCode, Json<Department>), AppError> {
    let (_, directory) = require(&state, &auth, perm::DEPARTMENTS_CREATE, req.parent_id).await?;

    if let Some(parent_id) = req.parent_id {
        if !directory.departments.contains(parent_id) {
            return Err(AppError::bad_request("Parent department does not exist"));
        }
    }

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO departments (id, name, code, parent_id, manager_id, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&req.name)
    .bind(&req.code)
    .bind(req.parent_id.map(|p| p.to_string()))
    .bind(req.manager_id.map(|m| m.to_string()))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("Department code already exists")
        }
        other => AppError::from(other),
    })?;

    let department = Department {
        id,
        name: req.name,
        code: req.code,
        parent_id: req.parent_id,
        manager_id: req.manager_id,
        active: true,
        created_at: now,
        updated_at: now,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &department, None);

    Ok((StatusCode::CREATED, Json(department)))
}

/// Reparenting is rejected when the new parent sits inside the node's own
/// subtree; that check happens here against current state, before any
/// write.
#[utoipa::path(
    put,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department ID")),
    request_body = DepartmentUpdateRequest,
    responses(
        (status = 200, description = "Department updated", body = Department),
        (status = 404, description = "Department not found"),
        (status = 409, description = "Reparenting would create a cycle"),
    ),
    security(("bearerAuth" = []))
)]
async fn update_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DepartmentUpdateRequest>,
) -> Result<Json<Department>, AppError> {
    let (_, directory) = require(&state, &auth, perm::DEPARTMENTS_EDIT, Some(id)).await?;

    let old = fetch_department(&state, id).await?;

    if let Some(new_parent) = req.parent_id {
        if !directory.departments.contains(new_parent) {
            return Err(AppError::bad_request("Parent department does not exist"));
        }
        if directory.departments.would_create_cycle(id, new_parent) {
            return Err(AppError::conflict(
                "A department may not become a child of its own descendant",
            ));
        }
    }

    let updated = Department {
        name: req.name.unwrap_or(old.name.clone()),
        code: req.code.unwrap_or(old.code.clone()),
        parent_id: req.parent_id.or(old.parent_id),
        manager_id: req.manager_id.or(old.manager_id),
        active: req.active.unwrap_or(old.active),
        updated_at: Utc::now(),
        ..old.clone()
    };

    sqlx::query(
        "UPDATE departments SET name = ?, code = ?, parent_id = ?, manager_id = ?, active = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&updated.name)
    .bind(&updated.code)
    .bind(updated.parent_id.map(|p| p.to_string()))
    .bind(updated.manager_id.map(|m| m.to_string()))
    .bind(updated.active)
    .bind(updated.updated_at)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    log_activity(&state.event_bus, "updated", Some(auth.user_id), &updated, Some(&old));

    Ok(Json(updated))
}

/// Soft delete, refused while the department still has child departments
/// or assigned users.
#[utoipa::path(
    delete,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department ID")),
    responses(
        (status = 204, description = "Department deleted"),
        (status = 404, description = "Department not found"),
        (status = 409, description = "Department still has children or users"),
    ),
    security(("bearerAuth" = []))
)]
async fn delete_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let (_, directory) = require(&state, &auth, perm::DEPARTMENTS_DELETE, Some(id)).await?;

    let department = fetch_department(&state, id).await?;

    if !directory.can_delete_department(id) {
        return Err(AppError::conflict(
            "Department still has child departments or assigned users",
        ));
    }

    let now = Utc::now();
    sqlx::query("UPDATE departments SET active = 0, deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &department, None);

    Ok(StatusCode::NO_CONTENT)
}
