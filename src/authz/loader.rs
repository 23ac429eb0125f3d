//! Bridges the relational store and the pure engine: builds `Principal`
//! and `Directory` snapshots, and performs the one authorization-adjacent
//! mutation (`assign_roles`) with its cache-invalidation contract.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::hierarchy::{DepartmentArena, DeptNode};

use super::principal::{Directory, Principal, UserRecord};

/// Read-through cache of resolved principals. Any mutation to role or
/// permission assignments must invalidate the affected entry (or clear the
/// whole cache) before the mutating call returns.
#[derive(Debug)]
pub struct PermissionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Instant, Principal)>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, user_id: Uuid) -> Option<Principal> {
        let entries = self.entries.lock().ok()?;
        let (cached_at, principal) = entries.get(&user_id)?;
        if cached_at.elapsed() < self.ttl {
            Some(principal.clone())
        } else {
            None
        }
    }

    fn put(&self, principal: Principal) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(principal.user_id, (Instant::now(), principal));
        }
    }

    pub fn invalidate(&self, user_id: Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&user_id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

fn parse_uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap_or_default()
}

/// Resolve a user into a `Principal`: their role names plus the union of
/// those roles' permissions. Returns `Ok(None)` for unknown or deactivated
/// users - a dangling token never grants access and never errors.
pub async fn load_principal(
    pool: &SqlitePool,
    cache: &PermissionCache,
    user_id: Uuid,
) -> Result<Option<Principal>, sqlx::Error> {
    if let Some(principal) = cache.get(user_id) {
        return Ok(Some(principal));
    }

    let Some(row) = sqlx::query(
        "SELECT id, department_id, active FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let active: bool = row.get("active");
    if !active {
        return Ok(None);
    }

    let department_id: Option<String> = row.get("department_id");

    let role_rows = sqlx::query(
        r#"
        SELECT r.name
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ? AND r.active = 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let perm_rows = sqlx::query(
        r#"
        SELECT DISTINCT p.name
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        INNER JOIN user_roles ur ON rp.role_id = ur.role_id
        INNER JOIN roles r ON r.id = ur.role_id
        WHERE ur.user_id = ? AND r.active = 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut principal = Principal::new(user_id)
        .with_roles(role_rows.iter().map(|r| r.get::<String, _>("name")))
        .with_permissions(perm_rows.iter().map(|r| r.get::<String, _>("name")));
    principal.department_id = department_id.as_deref().map(parse_uuid);

    cache.put(principal.clone());
    Ok(Some(principal))
}

/// Snapshot the department forest, the user directory, and the
/// role-permission store in one pass.
pub async fn load_directory(pool: &SqlitePool) -> Result<Directory, sqlx::Error> {
    let dept_rows = sqlx::query(
        "SELECT id, name, code, parent_id, manager_id, active FROM departments WHERE deleted_at IS NULL",
    )
    .fetch_all(pool)
    .await?;

    let arena = DepartmentArena::from_nodes(dept_rows.iter().map(|row| DeptNode {
        id: parse_uuid(row.get::<&str, _>("id")),
        name: row.get("name"),
        code: row.get("code"),
        parent_id: row.get::<Option<String>, _>("parent_id").as_deref().map(parse_uuid),
        manager_id: row.get::<Option<String>, _>("manager_id").as_deref().map(parse_uuid),
        active: row.get("active"),
    }));

    let user_rows = sqlx::query(
        "SELECT id, name, email, department_id, active FROM users WHERE deleted_at IS NULL",
    )
    .fetch_all(pool)
    .await?;

    let mut users: HashMap<Uuid, UserRecord> = user_rows
        .iter()
        .map(|row| {
            let id = parse_uuid(row.get::<&str, _>("id"));
            (
                id,
                UserRecord {
                    id,
                    name: row.get("name"),
                    email: row.get("email"),
                    department_id: row
                        .get::<Option<String>, _>("department_id")
                        .as_deref()
                        .map(parse_uuid),
                    active: row.get("active"),
                    roles: HashSet::new(),
                },
            )
        })
        .collect();

    let user_role_rows = sqlx::query(
        r#"
        SELECT ur.user_id, r.name
        FROM user_roles ur
        INNER JOIN roles r ON r.id = ur.role_id
        WHERE r.active = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    for row in &user_role_rows {
        let user_id = parse_uuid(row.get::<&str, _>("user_id"));
        if let Some(user) = users.get_mut(&user_id) {
            user.roles.insert(row.get("name"));
        }
    }

    let grant_rows = sqlx::query(
        r#"
        SELECT r.name AS role_name, p.name AS permission_name
        FROM role_permissions rp
        INNER JOIN roles r ON r.id = rp.role_id
        INNER JOIN permissions p ON p.id = rp.permission_id
        WHERE r.active = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut role_grants: HashMap<String, HashSet<String>> = HashMap::new();
    for row in &grant_rows {
        role_grants
            .entry(row.get("role_name"))
            .or_default()
            .insert(row.get("permission_name"));
    }

    Ok(Directory {
        departments: arena,
        users,
        role_grants,
    })
}

/// Replace a user's role set. Enforces the role-only policy by stripping
/// any direct permission grants in the same transaction, and invalidates
/// the principal cache before returning. Persistence failures are logged
/// and reported as `false`, never propagated - the caller must check the
/// boolean.
pub async fn assign_roles(
    pool: &SqlitePool,
    cache: &PermissionCache,
    user_id: Uuid,
    role_ids: &[Uuid],
) -> bool {
    let result: Result<(), sqlx::Error> = async {
        let mut tx = pool.begin().await?;

        // Role-only policy: no permission may live on the user directly.
        sqlx::query("DELETE FROM user_permissions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now();
        for role_id in role_ids {
            sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
                .bind(user_id.to_string())
                .bind(role_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }
    .await;

    cache.invalidate(user_id);

    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(%user_id, "role assignment failed: {err}");
            false
        }
    }
}
