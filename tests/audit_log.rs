mod common;

use std::time::Duration;

use anyhow::Result;
use sqlx::Row;
use sqlx::SqlitePool;

use common::*;

/// The listener persists asynchronously; poll until the expected number of
/// rows lands.
async fn wait_for_rows(pool: &SqlitePool, expected: i64) -> Result<()> {
    for _ in 0..100 {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(pool)
            .await?;
        if count >= expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("audit log never reached {expected} rows");
}

#[tokio::test]
async fn mutations_land_in_the_audit_log() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", &["departments.create"]).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    let (status, body) = send_json(
        &app,
        "POST",
        "/departments",
        &token,
        &serde_json::json!({ "name": "Ops", "code": "OPS" }),
    )
    .await?;
    assert_eq!(status, 201);
    let dept_id = body["id"].as_str().unwrap().to_string();

    wait_for_rows(&pool, 1).await?;

    let row = sqlx::query(
        "SELECT kind, actor_id, target_id, severity FROM audit_log ORDER BY seq DESC LIMIT 1",
    )
    .fetch_one(&pool)
    .await?;

    assert_eq!(row.get::<String, _>("kind"), "department.created");
    assert_eq!(row.get::<Option<String>, _>("actor_id"), Some(admin.to_string()));
    assert_eq!(row.get::<Option<String>, _>("target_id"), Some(dept_id));
    assert_eq!(row.get::<String, _>("severity"), "warning");

    Ok(())
}

#[tokio::test]
async fn destructive_actions_are_recorded_as_critical() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", &["users.view", "users.delete"]).await?;
    let user_role = seed_role(&pool, "user", &[]).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let target = seed_user(&pool, "T", None, &[user_role]).await?;

    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/users/{target}"),
        &token_for(admin)?,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 204);

    wait_for_rows(&pool, 1).await?;

    let severity: String =
        sqlx::query_scalar("SELECT severity FROM audit_log WHERE kind = 'user.deactivated'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(severity, "critical");

    Ok(())
}

#[tokio::test]
async fn the_hash_chain_links_consecutive_entries() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", &["departments.create"]).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    for code in ["A", "B", "C"] {
        let (status, _) = send_json(
            &app,
            "POST",
            "/departments",
            &token,
            &serde_json::json!({ "name": code, "code": code }),
        )
        .await?;
        assert_eq!(status, 201);
    }

    wait_for_rows(&pool, 3).await?;

    let rows = sqlx::query("SELECT prev_hash, hash FROM audit_log ORDER BY seq")
        .fetch_all(&pool)
        .await?;
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].get::<Option<String>, _>("prev_hash"), None);
    for pair in rows.windows(2) {
        assert_eq!(
            pair[1].get::<Option<String>, _>("prev_hash").as_deref(),
            Some(pair[0].get::<String, _>("hash").as_str()),
        );
    }

    Ok(())
}

#[tokio::test]
async fn audit_query_filters_by_kind_and_severity() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(
        &pool,
        "admin",
        &["audit.view", "departments.create", "users.view", "users.delete"],
    )
    .await?;
    let user_role = seed_role(&pool, "user", &[]).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let target = seed_user(&pool, "T", None, &[user_role]).await?;
    let token = token_for(admin)?;

    let (status, _) = send_json(
        &app,
        "POST",
        "/departments",
        &token,
        &serde_json::json!({ "name": "Ops", "code": "OPS" }),
    )
    .await?;
    assert_eq!(status, 201);
    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/users/{target}"),
        &token,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 204);

    wait_for_rows(&pool, 2).await?;

    let (status, body) = get_json(&app, "/audit", &token).await?;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = get_json(&app, "/audit?kind=department", &token).await?;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "department.created");

    let (_, body) = get_json(&app, "/audit?severity=critical", &token).await?;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "user.deactivated");

    Ok(())
}

#[tokio::test]
async fn audit_access_requires_the_permission() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "user", &[]).await?;
    let user = seed_user(&pool, "U", None, &[role]).await?;

    let (status, _) = get_json(&app, "/audit", &token_for(user)?).await?;
    assert_eq!(status, 403);

    Ok(())
}
