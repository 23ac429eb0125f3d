use uuid::Uuid;

use super::principal::{Directory, Subject, UserRecord};
use super::{roles, MANAGER_SCOPED_PERMISSIONS};

/// Pure resolution logic over a `Directory` snapshot.
///
/// Evaluation order for a scoped check:
/// 1. super-admin -> allow
/// 2. global role permission -> allow (global always dominates scoped)
/// 3. department-scoped resolution (manager cascade, then plain membership)
/// 4. deny
///
/// Dangling references (unknown department, unknown user) deny; they never
/// surface as errors past the engine boundary.
#[derive(Debug, Clone, Copy)]
pub struct PermissionEngine<'a> {
    directory: &'a Directory,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(directory: &'a Directory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Directory {
        self.directory
    }

    /// Global check: super-admin, or at least one assigned role owns the
    /// permission. Direct user-level grants are never consulted; by policy
    /// none should exist.
    pub fn has_permission(&self, subject: &dyn Subject, permission: &str) -> bool {
        if subject.is_super_admin() {
            tracing::debug!(user_id = %subject.id(), permission, "super-admin bypass");
            return true;
        }

        self.directory
            .role_grants
            .iter()
            .any(|(role, perms)| subject.has_role(role) && perms.contains(permission))
    }

    /// Scoped check. Without a department this degrades to the global
    /// check; with one, a global grant still short-circuits true - scoping
    /// only ever adds access, it never restricts a global permission.
    pub fn has_scoped_permission(
        &self,
        subject: &dyn Subject,
        permission: &str,
        department_id: Option<Uuid>,
    ) -> bool {
        if subject.is_super_admin() {
            return true;
        }

        let Some(department_id) = department_id else {
            return self.has_permission(subject, permission);
        };

        if self.has_permission(subject, permission) {
            return true;
        }

        self.has_department_scoped_permission(subject, permission, department_id)
    }

    /// Department-scoped resolution:
    /// 1. unknown department -> deny
    /// 2. subject manages the department -> manager capability check
    /// 3. else the *nearest* managing ancestor on the upward walk governs
    ///    (first match wins; the walk does not continue further up)
    /// 4. else a plain member of that exact department falls back to the
    ///    global check
    /// 5. else deny
    pub fn has_department_scoped_permission(
        &self,
        subject: &dyn Subject,
        permission: &str,
        department_id: Uuid,
    ) -> bool {
        let arena = &self.directory.departments;
        let Some(department) = arena.get(department_id) else {
            tracing::debug!(%department_id, permission, "unknown department, denying");
            return false;
        };

        if department.manager_id == Some(subject.id()) {
            return self.manager_in_department(subject, permission);
        }

        for ancestor_id in arena.ancestors(department_id) {
            if let Some(ancestor) = arena.get(ancestor_id) {
                if ancestor.manager_id == Some(subject.id()) {
                    tracing::debug!(
                        user_id = %subject.id(),
                        managed = %ancestor_id,
                        target = %department_id,
                        "manager authority cascading down"
                    );
                    return self.manager_in_department(subject, permission);
                }
            }
        }

        if subject.department_id() == Some(department_id) {
            return self.has_permission(subject, permission);
        }

        false
    }

    /// Capability of a manager within their managed subtree. Manager-type
    /// roles get the fixed allow-list only; admin-type roles defer to their
    /// full global permissions; any other role denies.
    fn manager_in_department(&self, subject: &dyn Subject, permission: &str) -> bool {
        if subject.has_role(roles::MANAGER) || subject.has_role(roles::DEPARTMENT_MANAGER) {
            return MANAGER_SCOPED_PERMISSIONS.contains(&permission);
        }

        if subject.has_role(roles::ADMIN) || subject.is_super_admin() {
            return self.has_permission(subject, permission);
        }

        false
    }

    /// Departments the subject can operate in: everything active for
    /// super-admins and admins; otherwise their own department, the
    /// departments they manage, and the full subtree under each managed
    /// department. De-duplicated by id.
    pub fn accessible_departments(&self, subject: &dyn Subject) -> Vec<Uuid> {
        let arena = &self.directory.departments;

        if subject.is_super_admin() || subject.is_admin() {
            return arena
                .iter()
                .filter(|dept| dept.active)
                .map(|dept| dept.id)
                .collect();
        }

        let mut out = Vec::new();
        let mut push = |id: Uuid, out: &mut Vec<Uuid>| {
            if !out.contains(&id) {
                out.push(id);
            }
        };

        if let Some(own) = subject.department_id() {
            if arena.contains(own) {
                push(own, &mut out);
            }
        }

        for managed in arena.managed_by(subject.id()) {
            push(managed, &mut out);
            for descendant in arena.descendants(managed) {
                push(descendant, &mut out);
            }
        }

        out
    }

    /// Users the subject may manage. Admins see every active user except
    /// super-admins; managers see active users inside their accessible
    /// departments, minus themselves and anyone privileged.
    pub fn manageable_users(&self, subject: &dyn Subject) -> Vec<&'a UserRecord> {
        let active = |user: &&'a UserRecord| user.active;

        if subject.is_super_admin() {
            return self.directory.users.values().filter(active).collect();
        }

        if subject.is_admin() {
            return self
                .directory
                .users
                .values()
                .filter(active)
                .filter(|user| !user.is_super_admin())
                .collect();
        }

        let accessible = self.accessible_departments(subject);
        self.directory
            .users
            .values()
            .filter(active)
            .filter(|user| user.id != subject.id())
            .filter(|user| !user.is_admin() && !user.is_super_admin())
            .filter(|user| {
                user.department_id
                    .map(|dept| accessible.contains(&dept))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn can_manage_user(&self, subject: &dyn Subject, target_id: Uuid) -> bool {
        if subject.is_super_admin() {
            return true;
        }

        let Some(target) = self.directory.user(target_id) else {
            return false;
        };

        if subject.is_admin() {
            return !target.is_super_admin();
        }

        self.manageable_users(subject)
            .iter()
            .any(|user| user.id == target_id)
    }
}
