mod common;

use anyhow::Result;
use uuid::Uuid;

use common::*;

const DEPT_PERMS: &[&str] = &[
    "departments.view",
    "departments.create",
    "departments.edit",
    "departments.delete",
];

#[tokio::test]
async fn detail_reports_level_path_and_children() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", DEPT_PERMS).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    let root = seed_department(&pool, "Engineering", "ENG", None, None).await?;
    let mid = seed_department(&pool, "Platform", "PLAT", Some(root), None).await?;
    let leaf = seed_department(&pool, "Storage", "STOR", Some(mid), None).await?;

    let (status, body) = get_json(&app, &format!("/departments/{mid}"), &token).await?;
    assert_eq!(status, 200);
    assert_eq!(body["level"], 1);
    assert_eq!(body["path"], "Engineering / Platform");
    assert_eq!(body["children"], serde_json::json!([leaf.to_string()]));
    assert_eq!(body["can_delete"], false);

    let (_, body) = get_json(&app, &format!("/departments/{leaf}"), &token).await?;
    assert_eq!(body["level"], 2);
    assert_eq!(body["can_delete"], true);

    Ok(())
}

#[tokio::test]
async fn reparenting_into_own_subtree_is_rejected() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", DEPT_PERMS).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    let root = seed_department(&pool, "Root", "ROOT", None, None).await?;
    let child = seed_department(&pool, "Child", "CHILD", Some(root), None).await?;
    let grandchild = seed_department(&pool, "Grandchild", "GC", Some(child), None).await?;

    // root under its own grandchild
    let (status, _) = send_json(
        &app,
        "PUT",
        &format!("/departments/{root}"),
        &token,
        &serde_json::json!({ "parent_id": grandchild }),
    )
    .await?;
    assert_eq!(status, 409);

    // self-parenting is the degenerate cycle
    let (status, _) = send_json(
        &app,
        "PUT",
        &format!("/departments/{child}"),
        &token,
        &serde_json::json!({ "parent_id": child }),
    )
    .await?;
    assert_eq!(status, 409);

    // a legal move still works
    let (status, body) = send_json(
        &app,
        "PUT",
        &format!("/departments/{grandchild}"),
        &token,
        &serde_json::json!({ "parent_id": root }),
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(body["parent_id"], root.to_string());

    Ok(())
}

#[tokio::test]
async fn unknown_parent_is_a_bad_request() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", DEPT_PERMS).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    let (status, _) = send_json(
        &app,
        "POST",
        "/departments",
        &token,
        &serde_json::json!({
            "name": "Orphaned",
            "code": "ORPH",
            "parent_id": Uuid::new_v4(),
        }),
    )
    .await?;
    assert_eq!(status, 400);

    Ok(())
}

#[tokio::test]
async fn delete_is_refused_until_the_department_is_empty() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", DEPT_PERMS).await?;
    let user_role = seed_role(&pool, "user", &[]).await?;
    let admin = seed_user(&pool, "Admin", None, &[role]).await?;
    let token = token_for(admin)?;

    let parent = seed_department(&pool, "Parent", "PAR", None, None).await?;
    let child = seed_department(&pool, "Child", "CHI", Some(parent), None).await?;
    let member = seed_user(&pool, "Member", Some(child), &[user_role]).await?;

    // has a child department
    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/departments/{parent}"),
        &token,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 409);

    // has an assigned user
    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/departments/{child}"),
        &token,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 409);

    // move the user out; the leaf becomes deletable
    sqlx::query("UPDATE users SET department_id = NULL WHERE id = ?")
        .bind(member.to_string())
        .execute(&pool)
        .await?;

    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/departments/{child}"),
        &token,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 204);

    // soft delete: the row survives with deleted_at set
    let deleted: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT deleted_at FROM departments WHERE id = ?")
            .bind(child.to_string())
            .fetch_one(&pool)
            .await?;
    assert!(deleted.is_some());

    // and the parent is deletable now that its subtree is gone
    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/departments/{parent}"),
        &token,
        &serde_json::Value::Null,
    )
    .await?;
    assert_eq!(status, 204);

    Ok(())
}

#[tokio::test]
async fn listing_is_scoped_to_what_the_caller_can_reach() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let manager_role = seed_role(&pool, "manager", &[]).await?;
    let manager = seed_user(&pool, "M", None, &[manager_role]).await?;

    let managed = seed_department(&pool, "Managed", "MGD", None, Some(manager)).await?;
    let nested = seed_department(&pool, "Nested", "NST", Some(managed), None).await?;
    let foreign = seed_department(&pool, "Foreign", "FRN", None, None).await?;

    let (status, body) = get_json(&app, "/departments", &token_for(manager)?).await?;
    assert_eq!(status, 200);

    let ids: Vec<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();

    assert!(ids.contains(&managed.to_string()));
    assert!(ids.contains(&nested.to_string()));
    assert!(!ids.contains(&foreign.to_string()));

    Ok(())
}

#[tokio::test]
async fn viewing_outside_the_callers_scope_is_forbidden() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let manager_role = seed_role(&pool, "department-manager", &[]).await?;
    let manager = seed_user(&pool, "M", None, &[manager_role]).await?;
    let _managed = seed_department(&pool, "Managed", "MGD", None, Some(manager)).await?;
    let foreign = seed_department(&pool, "Foreign", "FRN", None, None).await?;

    let (status, body) = get_json(&app, &format!("/departments/{foreign}"), &token_for(manager)?).await?;
    assert_eq!(status, 403);
    // the denial carries no explanation of what was missing
    assert_eq!(body["message"], "forbidden");

    Ok(())
}
