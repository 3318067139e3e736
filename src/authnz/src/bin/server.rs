//! # Authnz demo server
//!
//! HTTP service exercising the privilege engine behind a proxy-asserted
//! identity header.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /whoami` - Caller identity and globally held privileges
//! - `GET /experiments/:experiment_name/entries` - Guarded by the `read` privilege
//! - `POST /v1/check` - Privilege check for the caller, in any scope
//!
//! ## Configuration
//!
//! See [`authnz::config`]. The role store is PostgreSQL when `DATABASE_URL`
//! is set, otherwise the JSON documents named by `AUTHNZ_ROLES_FILE`.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use authnz::dal::{DocumentRoleStore, InMemoryRoleDocuments};
use authnz::{
    enforce_privilege, require_authentication, AuthenticatedUser, AuthnzConfig, AuthnzError,
    AuthnzState, AuthorizationEngine, AuthorizationScope, GroupResolver, InMemorySessionStore,
    RoleDataAccess, SessionRoleFacts,
};
use authnz::cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Privilege guarding the experiment endpoint
const ENTRIES_PRIVILEGE: &str = "read";

/// Shared application state
#[derive(Clone)]
struct AppState {
    authnz: AuthnzState,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<AuthnzError> for AppError {
    fn from(err: AuthnzError) -> Self {
        match err {
            AuthnzError::UnknownPrivilege { .. } => {
                warn!("Rejecting check: {}", err);
                AppError::BadRequest("Unknown privilege".to_string())
            }
            err => {
                error!("Check failed: {}", err);
                AppError::Internal("Authorization could not be evaluated".to_string())
            }
        }
    }
}

/// Privilege check request; the caller is always the subject
#[derive(Debug, Deserialize)]
struct CheckRequest {
    privilege: String,
    #[serde(default)]
    experiment: Option<String>,
    #[serde(default)]
    instrument: Option<String>,
}

/// Privilege check response
#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    decision: String,
    application: String,
    scope: String,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    application: String,
    uptime_seconds: u64,
    version: String,
}

#[derive(Debug, Serialize)]
struct WhoAmIResponse {
    user: String,
    application: String,
    privileges: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EntriesResponse {
    experiment: String,
    user: String,
    entries: Vec<String>,
}

/// POST /v1/check - Check one of the caller's privileges without session facts
async fn check_privilege(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let scope = AuthorizationScope {
        experiment: req.experiment,
        instrument: req.instrument,
    }
    .normalized();

    let engine = state.authnz.engine();
    let facts = SessionRoleFacts::new();
    let allowed = engine
        .authorize(&user, &req.privilege, &scope, &facts)
        .await?;

    info!(
        "Privilege check: user={}, privilege={}, scope={} -> {}",
        user,
        req.privilege,
        scope,
        if allowed { "ALLOW" } else { "DENY" }
    );

    Ok(Json(CheckResponse {
        allowed,
        decision: if allowed { "allow".to_string() } else { "deny".to_string() },
        application: engine.application().to_string(),
        scope: scope.to_string(),
    }))
}

/// GET /whoami - Identity and globally held privileges
async fn whoami(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<WhoAmIResponse>, AppError> {
    let engine = state.authnz.engine();
    let facts = SessionRoleFacts::new();
    let global = AuthorizationScope::global();

    let mut privileges = Vec::new();
    for privilege in engine.privileges().privileges() {
        if engine.authorize(&user, privilege, &global, &facts).await? {
            privileges.push(privilege.to_string());
        }
    }

    Ok(Json(WhoAmIResponse {
        user,
        application: engine.application().to_string(),
        privileges,
    }))
}

/// GET /experiments/:experiment_name/entries
async fn list_entries(
    Path(experiment): Path<String>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Json<EntriesResponse> {
    Json(EntriesResponse {
        experiment,
        user,
        entries: Vec::new(),
    })
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        application: state.authnz.engine().application().to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: authnz::VERSION.to_string(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route(
            "/v1/check",
            post(check_privilege).route_layer(middleware::from_fn_with_state(
                state.authnz.clone(),
                require_authentication,
            )),
        )
        .route(
            "/whoami",
            get(whoami).route_layer(middleware::from_fn_with_state(
                state.authnz.clone(),
                require_authentication,
            )),
        );

    match state.authnz.require_privilege(ENTRIES_PRIVILEGE) {
        Ok(guard) => {
            router = router.route(
                "/experiments/:experiment_name/entries",
                get(list_entries).route_layer(middleware::from_fn_with_state(guard, enforce_privilege)),
            );
        }
        Err(e) => warn!("Not serving experiment entries: {}", e),
    }

    router
        .layer(CookieManagerLayer::new())
        .layer(trace)
        .with_state(state)
}

async fn role_store(
    config: &AuthnzConfig,
    groups: Arc<dyn GroupResolver>,
) -> anyhow::Result<Arc<dyn RoleDataAccess>> {
    if let Some(database_url) = &config.database_url {
        #[cfg(feature = "postgres")]
        {
            let store = authnz::dal::SqlRoleStore::connect(database_url, groups).await?;
            store.run_migrations().await?;
            info!("Using PostgreSQL role store");
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        {
            anyhow::bail!(
                "DATABASE_URL={} is set but the postgres feature is disabled",
                database_url
            );
        }
    }

    let roles_file = config
        .roles_file
        .as_ref()
        .context("no role store configured: set DATABASE_URL or AUTHNZ_ROLES_FILE")?;
    let documents = InMemoryRoleDocuments::from_file(roles_file)
        .await
        .with_context(|| format!("loading role documents from {}", roles_file.display()))?;
    info!("Using role documents from {}", roles_file.display());

    Ok(Arc::new(DocumentRoleStore::new(Arc::new(documents), groups)))
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting authnz server v{}", authnz::VERSION);

    let config = AuthnzConfig::from_env()?;
    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Application: {}", config.application);
    info!("  User header: {}", config.user_header);
    info!("  Group backend: {}", config.group_backend);

    let groups = config.group_resolver()?;
    let store = role_store(&config, groups).await?;

    let engine = match AuthorizationEngine::new(store, config.application.clone()).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize engine: {}", e);
            return Err(e.into());
        }
    };

    let sessions = InMemorySessionStore::new(CacheConfig {
        capacity: 10_000,
        ttl: config.session_ttl,
    });

    let state = AppState {
        authnz: AuthnzState::new(Arc::new(engine), Arc::new(sessions), config.guard_settings()),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authnz::groups::StaticGroupResolver;
    use authnz::{GuardSettings, RoleRecord};
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn app() -> Router {
        let documents = InMemoryRoleDocuments::new();
        documents
            .insert_role(
                "site",
                RoleRecord::new("LogBook", "Editor")
                    .with_privileges(["read", "edit"])
                    .with_players(["uid:alice"]),
            )
            .await;
        let store = DocumentRoleStore::new(Arc::new(documents), Arc::new(StaticGroupResolver::new()));
        let engine = AuthorizationEngine::new(Arc::new(store), "LogBook").await.unwrap();

        create_router(AppState {
            authnz: AuthnzState::new(
                Arc::new(engine),
                Arc::new(InMemorySessionStore::default()),
                GuardSettings::default(),
            ),
            start_time: std::time::Instant::now(),
        })
    }

    fn check(user: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/check")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header("REMOTE_USER", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_check_requires_identity() {
        let response = app()
            .await
            .oneshot(check(None, serde_json::json!({ "privilege": "edit" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_check_answers_for_the_caller() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(check(Some("alice"), serde_json::json!({ "privilege": "edit" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["allowed"], true);

        // A subject in the body is ignored
        let response = app
            .oneshot(check(
                Some("carol"),
                serde_json::json!({ "user": "alice", "privilege": "edit" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["allowed"], false);
    }

    #[tokio::test]
    async fn test_unknown_privilege_hides_known_privileges() {
        let response = app()
            .await
            .oneshot(check(Some("alice"), serde_json::json!({ "privilege": "fly" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["message"], "Unknown privilege");
        assert!(!body.to_string().contains("edit"));
    }
}
