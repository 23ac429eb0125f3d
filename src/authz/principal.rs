use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::hierarchy::DepartmentArena;

/// The single user-capability interface the engine evaluates against.
/// Any concrete user representation exposing these three facts is
/// interchangeable as far as authorization is concerned.
pub trait Subject {
    fn id(&self) -> Uuid;
    fn department_id(&self) -> Option<Uuid>;
    fn has_role(&self, role: &str) -> bool;

    fn is_super_admin(&self) -> bool {
        self.has_role(super::roles::SUPER_ADMIN)
    }

    fn is_admin(&self) -> bool {
        self.has_role(super::roles::ADMIN)
    }
}

/// Snapshot of the authenticated user: roles plus the union of their
/// roles' permissions, resolved once by the loader. Permissions never
/// attach to users directly.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub department_id: Option<Uuid>,
    pub active: bool,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            department_id: None,
            active: true,
            roles: HashSet::new(),
            permissions: HashSet::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_department(mut self, department_id: Uuid) -> Self {
        self.department_id = Some(department_id);
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

impl Subject for Principal {
    fn id(&self) -> Uuid {
        self.user_id
    }

    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Directory entry for users other than the caller, as needed by the
/// manageable-users and manager-lookup queries.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub active: bool,
    pub roles: HashSet<String>,
}

impl UserRecord {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(super::roles::SUPER_ADMIN)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(super::roles::ADMIN)
    }
}

/// The in-memory snapshot the engine traverses: the department forest, all
/// user records, and the role-permission store (role name -> owned
/// permission names). Built per request by the loader; read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub departments: DepartmentArena,
    pub users: HashMap<Uuid, UserRecord>,
    pub role_grants: HashMap<String, HashSet<String>>,
}

impl Directory {
    pub fn new(departments: DepartmentArena, users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            departments,
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            role_grants: HashMap::new(),
        }
    }

    pub fn user(&self, id: Uuid) -> Option<&UserRecord> {
        self.users.get(&id)
    }

    /// Department delete guard: a department with child departments or
    /// assigned users cannot be removed.
    pub fn can_delete_department(&self, dept_id: Uuid) -> bool {
        if !self.departments.children(dept_id).is_empty() {
            return false;
        }
        !self
            .users
            .values()
            .any(|user| user.department_id == Some(dept_id))
    }
}
