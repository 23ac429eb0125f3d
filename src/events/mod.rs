//! Audit sink.
//!
//! Every mutating operation (and the module registry in particular) reports
//! security-relevant changes here. Emission is fire-and-forget over a
//! broadcast channel; a background listener projects events into the
//! `audit_log` table. A failure to record an audit entry never blocks or
//! fails the operation being audited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

/// One immutable audit record. `actor_id == None` means system-initiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: String,
    pub actor_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub target_id: Option<Uuid>,
    pub description: String,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            actor_id: None,
            target_type: None,
            target_id: None,
            description: description.into(),
            severity: Severity::Info,
            tags: Vec::new(),
            metadata: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn target(mut self, target_type: impl Into<String>, target_id: Uuid) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Fire-and-forget emission. A send error only means nobody is listening.
pub fn record(bus: &EventBus, event: AuditEvent) {
    let _ = bus.send(event);
}

/// Emit a standard "<entity>.<action>" event for any `Loggable` entity,
/// with the previous state attached for updates/deletes.
pub fn log_activity<T: Loggable>(
    bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
) {
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "new".to_string(),
        serde_json::to_value(entity).unwrap_or_default(),
    );
    if let Some(old) = old_entity {
        metadata.insert("old".to_string(), serde_json::to_value(old).unwrap_or_default());
    }

    let event = AuditEvent::new(
        format!("{}.{}", T::entity_type(), action),
        format!("{} {}", T::entity_type(), action),
    )
    .actor(actor_id)
    .target(T::entity_type(), entity.subject_id())
    .severity(entity.severity_for_action(action))
    .metadata(Value::Object(metadata));

    record(bus, event);
}

/// Background projection into `audit_log`. Each row carries a sha2 hash
/// chained over the previous row's hash and the serialized payload, so
/// after-the-fact tampering with the log is detectable.
pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    while let Ok(event) = rx.recv().await {
        if let Err(err) = persist_event(&pool, &event).await {
            // Observability must never become an availability hazard.
            tracing::error!(kind = %event.kind, "failed to persist audit entry: {err}");
        }
    }
}

async fn persist_event(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    if let Some(ref prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let tags = serde_json::to_string(&event.tags).unwrap_or_default();
    let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, kind, actor_id, target_type, target_id, description, severity, tags, metadata, occurred_at, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(&event.kind)
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(&event.target_type)
    .bind(event.target_id.map(|id| id.to_string()))
    .bind(&event.description)
    .bind(event.severity.as_str())
    .bind(tags)
    .bind(metadata)
    .bind(event.occurred_at)
    .bind(prev_hash)
    .bind(hash)
    .execute(pool)
    .await?;

    Ok(())
}
