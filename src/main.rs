use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use org_admin::models;
use org_admin::{app, db};

#[derive(OpenApi)]
#[openapi(
    // Per-handler `#[utoipa::path]` annotations register paths; listing them
    // here as well would duplicate registrations.
    components(
        schemas(
            models::user::User,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::user::AssignRolesRequest,
            models::user::AssignRolesResponse,
            models::rbac::Role,
            models::rbac::RoleCreateRequest,
            models::rbac::Permission,
            models::rbac::PermissionCreateRequest,
            models::rbac::AssignPermissionToRoleRequest,
            models::rbac::EffectivePermissions,
            models::department::Department,
            models::department::DepartmentDetail,
            models::department::DepartmentCreateRequest,
            models::department::DepartmentUpdateRequest,
            models::module::ModuleRecord,
            models::module::LifecycleResponse,
            models::audit::AuditEntry,
        )
    ),
    tags(
        (name = "Authz", description = "Authorization checks"),
        (name = "Users", description = "User management"),
        (name = "RBAC", description = "Roles and permissions"),
        (name = "Departments", description = "Organizational units"),
        (name = "Modules", description = "Feature module registry"),
        (name = "Audit", description = "Audit log"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let mut openapi = ApiDoc::openapi();
    if let Some(components) = openapi.components.as_mut() {
        components.add_security_scheme(
            "bearerAuth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::HttpBuilder::new()
                    .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }

    let app = app::create_app(pool)
        .await?
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi));

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
