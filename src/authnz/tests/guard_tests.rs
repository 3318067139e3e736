//! Guards over an axum router

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Extension, Router,
};
use authnz::{
    enforce_privilege, require_authentication, AuthenticatedUser, AuthnzState,
    AuthorizationEngine, GuardSettings, InMemorySessionStore, Instrument,
};
use common::{document_store, facility_documents, facility_groups, SwitchableStore};
use std::sync::Arc;
use tower::ServiceExt;
use tower_cookies::CookieManagerLayer;

async fn whoami(Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>) -> String {
    user
}

async fn state_with(settings: GuardSettings) -> (Arc<SwitchableStore>, AuthnzState) {
    let store = Arc::new(SwitchableStore::new(document_store(
        facility_documents(),
        Arc::new(facility_groups()),
    )));
    let engine = AuthorizationEngine::new(store.clone(), "LogBook").await.unwrap();
    let state = AuthnzState::new(
        Arc::new(engine),
        Arc::new(InMemorySessionStore::default()),
        settings,
    );
    (store, state)
}

fn router(state: &AuthnzState) -> Router {
    let edit = state.require_privilege("edit").unwrap();
    let switch = state.require_privilege("experiment_switch").unwrap();

    Router::new()
        .route(
            "/whoami",
            get(whoami).route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_authentication,
            )),
        )
        .route(
            "/experiments/:experiment_name/entries",
            get(whoami).route_layer(middleware::from_fn_with_state(edit, enforce_privilege)),
        )
        .route(
            "/switch",
            get(whoami).route_layer(middleware::from_fn_with_state(switch, enforce_privilege)),
        )
        .layer(CookieManagerLayer::new())
}

fn request(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("REMOTE_USER", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_missing_identity_is_forbidden() {
    let (_, state) = state_with(GuardSettings::default()).await;

    let response = router(&state).oneshot(request("/whoami", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_missing_identity_redirects_to_login() {
    let (_, state) = state_with(GuardSettings {
        redirect_url: Some("https://sso.example.org/login".to_string()),
        ..GuardSettings::default()
    })
    .await;

    let response = router(&state)
        .oneshot(request("/experiments/xpp123456/entries", None))
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://sso.example.org/login?next=%2Fexperiments%2Fxpp123456%2Fentries"
    );
}

#[tokio::test]
async fn test_identity_realm_is_stripped() {
    let (_, state) = state_with(GuardSettings::default()).await;

    let response = router(&state)
        .oneshot(request("/whoami", Some("ReadOnlyUser@SLAC.STANFORD.EDU")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ReadOnlyUser");
}

#[tokio::test]
async fn test_custom_identity_header() {
    let (_, state) = state_with(GuardSettings {
        user_header: "X-Forwarded-User".to_string(),
        ..GuardSettings::default()
    })
    .await;

    let response = router(&state)
        .oneshot(request("/whoami", Some("ReadOnlyUser")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri("/whoami")
        .header("X-Forwarded-User", "ReadOnlyUser")
        .body(Body::empty())
        .unwrap();
    let response = router(&state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// AUTHORIZATION
// ============================================================================

#[tokio::test]
async fn test_unknown_privilege_rejected_at_construction() {
    let (_, state) = state_with(GuardSettings::default()).await;

    let err = state.require_privilege("launch_rockets").err().unwrap();
    assert!(err.is_configuration());
    assert_eq!(state.require_privilege("read").unwrap().privilege(), "read");
}

#[tokio::test]
async fn test_experiment_path_parameter_scopes_the_check() {
    let (_, state) = state_with(GuardSettings::default()).await;
    let app = router(&state);

    let response = app
        .clone()
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "xpp123456_PI");

    let response = app
        .clone()
        .oneshot(request("/experiments/mec987654/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(request("/experiments/xpp123456/entries", Some("ReadOnlyUser")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_instrument_extension_scopes_the_check() {
    let (_, state) = state_with(GuardSettings::default()).await;

    let xpp = router(&state).layer(Extension(Instrument("XPP".to_string())));
    let response = xpp
        .oneshot(request("/switch", Some("xpp_instrument_operator")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mec = router(&state).layer(Extension(Instrument("MEC".to_string())));
    let response = mec
        .oneshot(request("/switch", Some("xpp_instrument_operator")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // No instrument: only global players count
    let response = router(&state)
        .oneshot(request("/switch", Some("xpp_instrument_operator")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ============================================================================
// SESSIONS
// ============================================================================

#[tokio::test]
async fn test_session_cookie_carries_role_facts() {
    let (store, state) = state_with(GuardSettings::default()).await;
    let app = router(&state);

    let response = app
        .clone()
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("authnz_session="));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    store.fail(true);

    let with_session = Request::builder()
        .uri("/experiments/xpp123456/entries")
        .header("REMOTE_USER", "xpp123456_PI")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(with_session).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    // A new session has no facts and the store is down
    let response = app
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_session_cookie_does_not_carry_facts_to_another_identity() {
    let (_, state) = state_with(GuardSettings::default()).await;
    let app = router(&state);

    let response = app
        .clone()
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let as_reader = |user: &str| {
        Request::builder()
            .uri("/experiments/xpp123456/entries")
            .header("REMOTE_USER", user)
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(as_reader("ReadOnlyUser")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The denied request leaves the owner's facts in place
    let response = app.oneshot(as_reader("xpp123456_PI")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_cookie_attributes() {
    let (_, state) = state_with(GuardSettings::default()).await;
    let response = router(&state)
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(!set_cookie.contains("Secure"));

    let (_, state) = state_with(GuardSettings {
        secure_cookie: true,
        ..GuardSettings::default()
    })
    .await;
    let response = router(&state)
        .oneshot(request("/experiments/xpp123456/entries", Some("xpp123456_PI")))
        .await
        .unwrap();
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("Secure"));
}
