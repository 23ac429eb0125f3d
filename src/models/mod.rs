pub mod audit;
pub mod department;
pub mod module;
pub mod rbac;
pub mod user;
