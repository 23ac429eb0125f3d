use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// The mirror row tracked in the relational store for each module. This is
/// a reporting convenience only; `module.json` descriptors are the
/// authoritative source of module state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModuleRecord {
    pub name: String,
    pub active: bool,
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a module lifecycle command. Unlike authorization denials,
/// these are admin-only operations, so the failure reason is surfaced
/// verbatim to aid operational debugging.
#[derive(Debug, Serialize, ToSchema)]
pub struct LifecycleResponse {
    pub success: bool,
    pub message: String,
}

impl LifecycleResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
