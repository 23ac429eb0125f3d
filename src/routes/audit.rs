//! Read access to the append-only audit log.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::permissions as perm;
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::models::audit::{AuditEntry, AuditQuery};

use super::require;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_entries))
}

#[utoipa::path(
    get,
    path = "/audit",
    tag = "Audit",
    params(
        ("kind" = Option<String>, Query, description = "Event kind prefix filter"),
        ("severity" = Option<String>, Query, description = "Severity filter"),
        ("limit" = Option<i64>, Query, description = "Maximum rows, default 100"),
    ),
    responses((status = 200, description = "Audit entries, newest first", body = Vec<AuditEntry>)),
    security(("bearerAuth" = []))
)]
async fn list_entries(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require(&state, &auth, perm::AUDIT_VIEW, None).await?;

    let limit = query.limit.clamp(1, 1000);
    let kind_prefix = format!("{}%", query.kind.unwrap_or_default());

    let rows = sqlx::query(
        r#"
        SELECT id, kind, actor_id, target_type, target_id, description, severity, tags, metadata, occurred_at
        FROM audit_log
        WHERE kind LIKE ? AND (? IS NULL OR severity = ?)
        ORDER BY seq DESC
        LIMIT ?
        "#,
    )
    .bind(kind_prefix)
    .bind(&query.severity)
    .bind(&query.severity)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let entries: Vec<AuditEntry> = rows
        .iter()
        .map(|row| AuditEntry {
            id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
            kind: row.get("kind"),
            actor_id: row
                .get::<Option<String>, _>("actor_id")
                .and_then(|s| Uuid::parse_str(&s).ok()),
            target_type: row.get("target_type"),
            target_id: row
                .get::<Option<String>, _>("target_id")
                .and_then(|s| Uuid::parse_str(&s).ok()),
            description: row.get("description"),
            severity: row.get("severity"),
            tags: serde_json::from_str(row.get::<&str, _>("tags")).unwrap_or_default(),
            metadata: serde_json::from_str(row.get::<&str, _>("metadata"))
                .unwrap_or(serde_json::Value::Null),
            occurred_at: row.get("occurred_at"),
        })
        .collect();

    Ok(Json(entries))
}
