mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;
use uuid::Uuid;

use common::*;

#[tokio::test]
async fn check_requires_a_token() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let req = Request::builder()
        .method("GET")
        .uri("/authz/check?permission=users.view")
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn super_admin_is_allowed_everything() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "super-admin", &[]).await?;
    let dept = seed_department(&pool, "Ops", "OPS", None, None).await?;
    let user = seed_user(&pool, "Root", None, &[role]).await?;
    let token = token_for(user)?;

    for permission in ["users.edit", "roles.manage", "made.up"] {
        let (status, body) = get_json(
            &app,
            &format!("/authz/check?permission={permission}&department_id={dept}"),
            &token,
        )
        .await?;
        assert_eq!(status, 200);
        assert_eq!(body["allowed"], true, "super-admin denied {permission}");
    }

    Ok(())
}

#[tokio::test]
async fn global_permission_satisfies_scoped_check() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "auditor", &["audit.view"]).await?;
    let dept = seed_department(&pool, "Ops", "OPS", None, None).await?;
    // not a member or manager of the department
    let user = seed_user(&pool, "Aud", None, &[role]).await?;
    let token = token_for(user)?;

    let (status, body) = get_json(
        &app,
        &format!("/authz/check?permission=audit.view&department_id={dept}"),
        &token,
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(body["allowed"], true);

    Ok(())
}

#[tokio::test]
async fn manager_cascade_grants_allow_list_down_the_tree() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let manager_role = seed_role(&pool, "manager", &[]).await?;
    let manager = seed_user(&pool, "M", None, &[manager_role]).await?;

    let root = seed_department(&pool, "Root", "ROOT", None, None).await?;
    let mid = seed_department(&pool, "Mid", "MID", Some(root), Some(manager)).await?;
    let leaf = seed_department(&pool, "Leaf", "LEAF", Some(mid), None).await?;

    let token = token_for(manager)?;

    // users.view is in the delegated allow-list; authority cascades to Leaf
    let (_, body) = get_json(
        &app,
        &format!("/authz/check?permission=users.view&department_id={leaf}"),
        &token,
    )
    .await?;
    assert_eq!(body["allowed"], true);

    // roles.delete is not delegated
    let (_, body) = get_json(
        &app,
        &format!("/authz/check?permission=roles.delete&department_id={leaf}"),
        &token,
    )
    .await?;
    assert_eq!(body["allowed"], false);

    // no authority above the managed department
    let (_, body) = get_json(
        &app,
        &format!("/authz/check?permission=users.view&department_id={root}"),
        &token,
    )
    .await?;
    assert_eq!(body["allowed"], false);

    Ok(())
}

#[tokio::test]
async fn plain_member_gets_no_manager_privileges() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let manager_role = seed_role(&pool, "department-manager", &[]).await?;
    let user_role = seed_role(&pool, "user", &[]).await?;
    let manager = seed_user(&pool, "M", None, &[manager_role]).await?;
    let dept = seed_department(&pool, "Ops", "OPS", None, Some(manager)).await?;
    let member = seed_user(&pool, "U", Some(dept), &[user_role]).await?;

    let (_, body) = get_json(
        &app,
        &format!("/authz/check?permission=users.edit&department_id={dept}"),
        &token_for(member)?,
    )
    .await?;
    assert_eq!(body["allowed"], false);

    let (_, body) = get_json(
        &app,
        &format!("/authz/check?permission=users.edit&department_id={dept}"),
        &token_for(manager)?,
    )
    .await?;
    assert_eq!(body["allowed"], true);

    Ok(())
}

#[tokio::test]
async fn unknown_department_denies() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let role = seed_role(&pool, "admin", &["users.view"]).await?;
    let user = seed_user(&pool, "A", None, &[role]).await?;

    let (status, body) = get_json(
        &app,
        &format!("/authz/check?permission=nonexistent.perm&department_id={}", Uuid::new_v4()),
        &token_for(user)?,
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(body["allowed"], false);

    Ok(())
}

#[tokio::test]
async fn assigning_roles_strips_direct_permission_grants() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let admin_role = seed_role(&pool, "admin", &["roles.manage", "roles.view"]).await?;
    let admin = seed_user(&pool, "Admin", None, &[admin_role]).await?;

    let user_role = seed_role(&pool, "user", &[]).await?;
    let target = seed_user(&pool, "T", None, &[]).await?;

    // plant a legacy direct grant; the role-only policy must remove it
    let perm_id: String = sqlx::query_scalar("SELECT id FROM permissions WHERE name = 'roles.manage'")
        .fetch_one(&pool)
        .await?;
    sqlx::query(
        "INSERT INTO user_permissions (id, user_id, permission_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(target.to_string())
    .bind(&perm_id)
    .bind(chrono::Utc::now())
    .execute(&pool)
    .await?;

    let (status, body) = send_json(
        &app,
        "PUT",
        &format!("/users/{target}/roles"),
        &token_for(admin)?,
        &serde_json::json!({ "role_ids": [user_role] }),
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let direct: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_permissions WHERE user_id = ?")
        .bind(target.to_string())
        .fetch_one(&pool)
        .await?;
    assert_eq!(direct, 0);

    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE user_id = ?")
        .bind(target.to_string())
        .fetch_one(&pool)
        .await?;
    assert_eq!(roles, 1);

    Ok(())
}

#[tokio::test]
async fn role_grant_takes_effect_without_stale_cache() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let admin_role = seed_role(&pool, "admin", &["roles.manage", "roles.view"]).await?;
    let admin = seed_user(&pool, "Admin", None, &[admin_role]).await?;
    let viewer_role = seed_role(&pool, "viewer", &[]).await?;
    let viewer = seed_user(&pool, "V", None, &[viewer_role]).await?;
    let viewer_token = token_for(viewer)?;

    // denied, and the denial is now cached
    let (_, body) = get_json(&app, "/authz/check?permission=audit.view", &viewer_token).await?;
    assert_eq!(body["allowed"], false);

    // grant audit.view to the viewer role through the API
    let perm = send_json(
        &app,
        "POST",
        "/permissions",
        &token_for(admin)?,
        &serde_json::json!({ "name": "audit.view" }),
    )
    .await?;
    let perm_id = perm.1["id"].as_str().unwrap().to_string();
    let (status, _) = send_json(
        &app,
        "POST",
        &format!("/roles/{viewer_role}/permissions"),
        &token_for(admin)?,
        &serde_json::json!({ "permission_id": perm_id }),
    )
    .await?;
    assert_eq!(status, 201);

    // the mutation cleared the principal cache; the grant is visible now
    let (_, body) = get_json(&app, "/authz/check?permission=audit.view", &viewer_token).await?;
    assert_eq!(body["allowed"], true);

    Ok(())
}

#[tokio::test]
async fn manager_sees_only_their_subtree_in_user_listing() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let manager_role = seed_role(&pool, "manager", &[]).await?;
    let user_role = seed_role(&pool, "user", &[]).await?;
    let admin_role = seed_role(&pool, "admin", &[]).await?;

    let manager = seed_user(&pool, "M", None, &[manager_role]).await?;
    let mid = seed_department(&pool, "Mid", "MID", None, Some(manager)).await?;
    let leaf = seed_department(&pool, "Leaf", "LEAF", Some(mid), None).await?;
    let other = seed_department(&pool, "Other", "OTH", None, None).await?;

    let inside = seed_user(&pool, "Inside", Some(mid), &[user_role]).await?;
    let below = seed_user(&pool, "Below", Some(leaf), &[user_role]).await?;
    let outside = seed_user(&pool, "Outside", Some(other), &[user_role]).await?;
    let privileged = seed_user(&pool, "Privileged", Some(mid), &[admin_role]).await?;

    let (status, body) = get_json(&app, "/users", &token_for(manager)?).await?;
    assert_eq!(status, 200);

    let ids: Vec<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap().to_string())
        .collect();

    assert!(ids.contains(&inside.to_string()));
    assert!(ids.contains(&below.to_string()));
    assert!(!ids.contains(&outside.to_string()));
    assert!(!ids.contains(&privileged.to_string()));
    assert!(!ids.contains(&manager.to_string()));

    Ok(())
}
