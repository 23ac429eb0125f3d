use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for audit entries. Controls retention and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine events
    #[default]
    Info,
    /// Events an operator should notice (denials, failed mutations)
    Warning,
    /// Security-relevant events: role changes, module lifecycle, deletions
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Trait for entities that appear in the audit log. Implement on a model to
/// enable declarative audit emission from handlers.
pub trait Loggable: Serialize + Send + Sync {
    /// The entity type name (e.g. "user", "department", "module").
    /// This becomes the prefix in event kinds like "department.created".
    fn entity_type() -> &'static str;

    /// The target ID (usually the entity's primary key)
    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Info
    }

    /// Override severity based on action ("deleted" is always critical)
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "deactivated" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
