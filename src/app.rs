use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::PermissionCache;
use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::jwt::JwtConfig;
use crate::modules::{ModuleRegistry, RegistryConfig};
use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub registry: Arc<ModuleRegistry>,
    pub authz_cache: Arc<PermissionCache>,
}

fn authz_cache_ttl() -> Duration {
    std::env::var("AUTHZ_CACHE_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(60))
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (event_bus, rx) = events::init_event_bus();
    tokio::spawn(events::start_audit_listener(rx, pool.clone()));

    let registry = Arc::new(ModuleRegistry::new(
        RegistryConfig::from_env(),
        pool.clone(),
        event_bus.clone(),
    ));
    if let Err(err) = registry.sync_all_mirrors().await {
        tracing::warn!("module mirror sync at startup failed: {err}");
    }

    let state = AppState {
        pool,
        jwt: Arc::new(jwt_config),
        event_bus,
        registry,
        authz_cache: Arc::new(PermissionCache::new(authz_cache_ttl())),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .nest("/health", routes::health::routes())
        .nest("/authz", routes::authz::routes())
        .nest("/users", routes::users::routes())
        .nest("/roles", routes::roles::routes())
        .nest("/permissions", routes::roles::permission_routes())
        .nest("/departments", routes::departments::routes())
        .nest("/modules", routes::modules::routes())
        .nest("/audit", routes::audit::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
