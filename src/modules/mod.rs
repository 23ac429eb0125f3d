//! Module registry.
//!
//! Single source of truth for which feature modules exist and are active.
//! Module state lives in per-module `module.json` descriptors under a
//! configured directory; a mirror row in the `modules` table exists only
//! for querying convenience and is rewritten after every descriptor change
//! (descriptor first, mirror second - the mirror is a cache, never a
//! source of truth).
//!
//! Reads go through a TTL cache; the dependency and safe-mode guards on
//! `enable`/`disable` always re-read live disk state and never trust the
//! cache.

mod manifest;

pub use manifest::{ModuleManifest, NavEntry, Navigation};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;

use crate::authz::{Principal, Subject};
use crate::events::{AuditEvent, EventBus, Severity};

#[derive(thiserror::Error, Debug)]
pub enum ModuleError {
    #[error("module '{0}' not found")]
    NotFound(String),
    #[error("cannot enable module '{module}': dependencies not met: {}", missing.join(", "))]
    DependenciesNotMet { module: String, missing: Vec<String> },
    #[error("cannot disable critical module '{0}' while safe mode is enabled")]
    CriticalInSafeMode(String),
    #[error("cannot disable module '{module}': active modules depend on it: {}", dependents.join(", "))]
    HasDependents { module: String, dependents: Vec<String> },
    #[error("module storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("module database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Registry configuration, resolved from the environment once at startup.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub dir: PathBuf,
    pub safe_mode: bool,
    pub cache_ttl: Duration,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        let dir = std::env::var("MODULES_DIR").unwrap_or_else(|_| "modules".to_string());
        let safe_mode = std::env::var("SAFE_MODE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "on"))
            .unwrap_or(false);
        let cache_ttl = std::env::var("MODULE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        Self {
            dir: PathBuf::from(dir),
            safe_mode,
            cache_ttl,
        }
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            safe_mode: false,
            cache_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

pub struct ModuleRegistry {
    config: RegistryConfig,
    pool: SqlitePool,
    bus: EventBus,
    cache: Mutex<Option<(Instant, Vec<ModuleManifest>)>>,
}

impl ModuleRegistry {
    pub fn new(config: RegistryConfig, pool: SqlitePool, bus: EventBus) -> Self {
        Self {
            config,
            pool,
            bus,
            cache: Mutex::new(None),
        }
    }

    pub fn safe_mode(&self) -> bool {
        self.config.safe_mode
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.config.dir.join(name).join("module.json")
    }

    /// Live read of one descriptor, bypassing the cache.
    fn read_manifest(&self, name: &str) -> Result<ModuleManifest, ModuleError> {
        let path = self.manifest_path(name);
        if !path.is_file() {
            return Err(ModuleError::NotFound(name.to_string()));
        }
        Ok(ModuleManifest::read(&path)?)
    }

    /// Live scan of every descriptor under the module directory.
    fn scan_disk(&self) -> Result<Vec<ModuleManifest>, ModuleError> {
        let mut modules = Vec::new();
        if !self.config.dir.is_dir() {
            return Ok(modules);
        }

        for entry in std::fs::read_dir(&self.config.dir)? {
            let entry = entry?;
            let descriptor = entry.path().join("module.json");
            if descriptor.is_file() {
                match ModuleManifest::read(&descriptor) {
                    Ok(manifest) => modules.push(manifest),
                    Err(err) => {
                        tracing::warn!(path = %descriptor.display(), "skipping unreadable module descriptor: {err}");
                    }
                }
            }
        }

        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }

    /// All module definitions, through the TTL cache.
    pub fn get_all(&self) -> Result<Vec<ModuleManifest>, ModuleError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some((cached_at, modules)) = cache.as_ref() {
                if cached_at.elapsed() < self.config.cache_ttl {
                    return Ok(modules.clone());
                }
            }
        }

        let modules = self.scan_disk()?;
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some((Instant::now(), modules.clone()));
        }
        Ok(modules)
    }

    pub fn get_active(&self) -> Result<Vec<ModuleManifest>, ModuleError> {
        Ok(self.get_all()?.into_iter().filter(|m| m.active).collect())
    }

    pub fn get(&self, name: &str) -> Result<Option<ModuleManifest>, ModuleError> {
        Ok(self.get_all()?.into_iter().find(|m| m.name == name))
    }

    pub fn is_active(&self, name: &str) -> Result<bool, ModuleError> {
        Ok(self.get(name)?.map(|m| m.active).unwrap_or(false))
    }

    /// Modules whose dependency list contains `name`.
    pub fn get_dependents(&self, name: &str) -> Result<Vec<ModuleManifest>, ModuleError> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|m| m.depends_on.iter().any(|dep| dep == name))
            .collect())
    }

    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Activate a module. Every declared dependency must already be active;
    /// the check runs against live disk state, never the cache.
    pub async fn enable(&self, name: &str, actor_id: Option<uuid::Uuid>) -> Result<(), ModuleError> {
        let mut manifest = self.read_manifest(name)?;
        if manifest.active {
            return Ok(());
        }

        let missing: Vec<String> = manifest
            .depends_on
            .iter()
            .filter(|dep| {
                self.read_manifest(dep)
                    .map(|m| !m.active)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ModuleError::DependenciesNotMet {
                module: name.to_string(),
                missing,
            });
        }

        manifest.active = true;
        self.persist(&manifest).await?;
        self.audit("module.enabled", name, actor_id, "module enabled");
        Ok(())
    }

    /// Deactivate a module. Critical modules are locked while safe mode is
    /// on; a module with active dependents cannot be disabled (the failure
    /// names them). Guards run against live disk state.
    pub async fn disable(&self, name: &str, actor_id: Option<uuid::Uuid>) -> Result<(), ModuleError> {
        let mut manifest = self.read_manifest(name)?;
        if !manifest.active {
            return Ok(());
        }

        if manifest.critical && self.config.safe_mode {
            return Err(ModuleError::CriticalInSafeMode(name.to_string()));
        }

        let dependents: Vec<String> = self
            .scan_disk()?
            .into_iter()
            .filter(|m| m.active && m.depends_on.iter().any(|dep| dep == name))
            .map(|m| m.name)
            .collect();
        if !dependents.is_empty() {
            return Err(ModuleError::HasDependents {
                module: name.to_string(),
                dependents,
            });
        }

        manifest.active = false;
        self.persist(&manifest).await?;
        self.audit("module.disabled", name, actor_id, "module disabled");
        Ok(())
    }

    /// Two-phase write: descriptor first (authoritative), then the mirror
    /// row, then drop the cache so the change is observed immediately.
    async fn persist(&self, manifest: &ModuleManifest) -> Result<(), ModuleError> {
        manifest.write(&self.manifest_path(&manifest.name))?;
        self.sync_mirror(manifest).await?;
        self.invalidate_cache();
        Ok(())
    }

    async fn sync_mirror(&self, manifest: &ModuleManifest) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO modules (name, active, version, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                active = excluded.active,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&manifest.name)
        .bind(manifest.active)
        .bind(&manifest.version)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn audit(&self, kind: &str, name: &str, actor_id: Option<uuid::Uuid>, description: &str) {
        crate::events::record(
            &self.bus,
            AuditEvent::new(kind, format!("{description}: {name}"))
                .actor(actor_id)
                .severity(Severity::Critical)
                .tag("module")
                .tag(name)
                .metadata(serde_json::json!({ "module": name })),
        );
    }

    /// Can the user see this module at all? Super-admins always can; a
    /// module declaring no permissions is open; otherwise holding *any one*
    /// of the declared permissions suffices (OR semantics - intentionally
    /// looser than `navigation_for`). Unknown module names deny.
    pub fn user_has_module_access(
        &self,
        principal: &Principal,
        name: &str,
    ) -> Result<bool, ModuleError> {
        if principal.is_super_admin() {
            return Ok(true);
        }

        let Some(manifest) = self.get(name)? else {
            return Ok(false);
        };

        if manifest.permissions.is_empty() {
            return Ok(true);
        }

        Ok(manifest
            .permissions
            .iter()
            .any(|p| principal.has_permission(p)))
    }

    /// Primary navigation entries for the user: active modules carrying
    /// navigation metadata where the user satisfies *all* declared
    /// permissions (AND semantics - a stricter gate than
    /// `user_has_module_access`, and deliberately so), ordered ascending.
    pub fn navigation_for(&self, principal: &Principal) -> Result<Vec<NavEntry>, ModuleError> {
        let mut entries: Vec<NavEntry> = self
            .get_active()?
            .into_iter()
            .filter(|m| {
                principal.is_super_admin()
                    || m.permissions.iter().all(|p| principal.has_permission(p))
            })
            .filter_map(|m| {
                let nav = m.navigation?;
                Some(NavEntry {
                    module: m.name,
                    label: nav.label,
                    route: nav.route,
                    order: nav.order,
                })
            })
            .collect();

        entries.sort_by_key(|entry| entry.order);
        Ok(entries)
    }

    /// Seed the mirror table from disk at startup so reporting queries see
    /// every installed module.
    pub async fn sync_all_mirrors(&self) -> Result<(), ModuleError> {
        for manifest in self.scan_disk()? {
            self.sync_mirror(&manifest).await?;
        }
        Ok(())
    }
}
