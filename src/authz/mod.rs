//! Authorization - Permission & Scope Resolution Engine
//!
//! Composes three sources into an allow/deny decision for a
//! (user, permission, optional department) triple:
//! - global role-based permissions (permissions attach to roles only,
//!   never directly to users)
//! - the department hierarchy, with manager authority cascading down
//!   through descendant departments
//! - a super-admin override that bypasses everything
//!
//! All read operations are pure and synchronous over an in-memory snapshot;
//! the loader builds that snapshot from the database.

mod engine;
mod loader;
mod principal;

pub use engine::PermissionEngine;
pub use loader::{assign_roles, load_directory, load_principal, PermissionCache};
pub use principal::{Directory, Principal, Subject, UserRecord};

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "super-admin";
    pub const ADMIN: &str = "admin";
    pub const MANAGER: &str = "manager";
    pub const DEPARTMENT_MANAGER: &str = "department-manager";
    pub const USER: &str = "user";
}

/// Well-known permission names
pub mod permissions {
    // Users
    pub const USERS_VIEW: &str = "users.view";
    pub const USERS_CREATE: &str = "users.create";
    pub const USERS_EDIT: &str = "users.edit";
    pub const USERS_DELETE: &str = "users.delete";

    // Roles
    pub const ROLES_VIEW: &str = "roles.view";
    pub const ROLES_MANAGE: &str = "roles.manage";

    // Departments
    pub const DEPARTMENTS_VIEW: &str = "departments.view";
    pub const DEPARTMENTS_CREATE: &str = "departments.create";
    pub const DEPARTMENTS_EDIT: &str = "departments.edit";
    pub const DEPARTMENTS_DELETE: &str = "departments.delete";

    // Modules
    pub const MODULES_VIEW: &str = "modules.view";
    pub const MODULES_MANAGE: &str = "modules.manage";

    // Audit
    pub const AUDIT_VIEW: &str = "audit.view";

    // Files
    pub const FILES_UPLOAD: &str = "files.upload";
    pub const FILES_DOWNLOAD: &str = "files.download";
}

/// Fixed capability set delegated to department managers within their
/// department subtree. Deliberately narrow and hardcoded policy, distinct
/// from whatever the manager's own roles grant globally.
pub const MANAGER_SCOPED_PERMISSIONS: &[&str] = &[
    permissions::USERS_VIEW,
    permissions::USERS_CREATE,
    permissions::USERS_EDIT,
    permissions::DEPARTMENTS_VIEW,
    permissions::AUDIT_VIEW,
    permissions::FILES_UPLOAD,
    permissions::FILES_DOWNLOAD,
];
