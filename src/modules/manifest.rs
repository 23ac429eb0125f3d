use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Navigation metadata for modules that surface a primary menu entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Navigation {
    pub label: String,
    pub route: String,
    #[serde(default)]
    pub order: i64,
}

/// Declarative module descriptor, one `module.json` per module directory.
/// The descriptor file is the authoritative source of module state; the
/// `modules` table row is a mirror kept in sync on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModuleManifest {
    pub name: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Navigation>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[schema(value_type = Object)]
    pub config: Value,
}

impl ModuleManifest {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::other)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, raw)
    }
}

/// One entry of the user-facing navigation menu, derived from active
/// modules the user fully qualifies for.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NavEntry {
    pub module: String,
    pub label: String,
    pub route: String,
    pub order: i64,
}
