#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

use org_admin::create_app;
use org_admin::jwt::JwtConfig;

/// Fresh app + database in a tempdir, migrations applied.
pub async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

pub fn token_for(user_id: Uuid) -> Result<String> {
    std::env::set_var("JWT_SECRET", "test-secret");
    Ok(JwtConfig::from_env()?.encode(user_id)?)
}

/// Create a role and attach the given permissions (created on demand).
pub async fn seed_role(pool: &SqlitePool, name: &str, permissions: &[&str]) -> Result<Uuid> {
    let role_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO roles (id, name, guard, level, active, description, created_at, updated_at)
         VALUES (?, ?, 'web', 0, 1, NULL, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    for permission in permissions {
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM permissions WHERE name = ?")
            .bind(permission)
            .fetch_optional(pool)
            .await?;

        let permission_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO permissions (id, name, description, created_at, updated_at)
                     VALUES (?, ?, NULL, ?, ?)",
                )
                .bind(&id)
                .bind(permission)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
                id
            }
        };

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(role_id.to_string())
        .bind(permission_id)
        .bind(now)
        .execute(pool)
        .await?;
    }

    Ok(role_id)
}

pub async fn seed_user(
    pool: &SqlitePool,
    name: &str,
    department_id: Option<Uuid>,
    role_ids: &[Uuid],
) -> Result<Uuid> {
    let user_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, department_id, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(name)
    .bind(format!("{}@example.com", user_id))
    .bind(department_id.map(|d| d.to_string()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    for role_id in role_ids {
        sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(role_id.to_string())
            .bind(now)
            .execute(pool)
            .await?;
    }

    Ok(user_id)
}

pub async fn seed_department(
    pool: &SqlitePool,
    name: &str,
    code: &str,
    parent_id: Option<Uuid>,
    manager_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO departments (id, name, code, parent_id, manager_id, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(code)
    .bind(parent_id.map(|p| p.to_string()))
    .bind(manager_id.map(|m| m.to_string()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn get_json(app: &Router, uri: &str, token: &str) -> Result<(u16, serde_json::Value)> {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())?;
    send(app, req).await
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    payload: &serde_json::Value,
) -> Result<(u16, serde_json::Value)> {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(payload.to_string()))?;
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> Result<(u16, serde_json::Value)> {
    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status().as_u16();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}
