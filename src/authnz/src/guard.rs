//! Request guards for axum
//!
//! Two middleware functions, applied with
//! [`axum::middleware::from_fn_with_state`]:
//!
//! - [`require_authentication`] with an [`AuthnzState`]
//! - [`enforce_privilege`] with a [`PrivilegeGuard`] built by
//!   [`AuthnzState::require_privilege`]
//!
//! ```ignore
//! let edit = state.require_privilege("edit")?;
//! Router::new()
//!     .route("/experiments/:experiment_name/entries", post(create_entry))
//!     .route_layer(middleware::from_fn_with_state(edit, enforce_privilege))
//!     .layer(CookieManagerLayer::new());
//! ```
//!
//! The experiment scope is read from the `experiment_name` path parameter,
//! so privilege guards belong in `route_layer`. The instrument scope comes
//! from an [`Instrument`] extension inserted by an earlier layer. Session
//! facts are keyed by a cookie managed through `tower-cookies`; without a
//! `CookieManagerLayer` every request starts with empty facts.

use crate::engine::AuthorizationEngine;
use crate::error::{AuthnzError, Result};
use crate::session::{SessionRoleFacts, SessionStore};
use crate::types::AuthorizationScope;
use axum::{
    extract::{RawPathParams, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tower_cookies::{cookie::SameSite, Cookie, Cookies};
use tracing::{error, warn};

/// Path parameter naming the experiment of a request
pub const EXPERIMENT_PATH_PARAM: &str = "experiment_name";

/// Instrument of the current request, set by an upstream layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument(pub String);

/// Caller identity, inserted into request extensions by the guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Guard settings
#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// Header carrying the proxy-asserted identity
    pub user_header: String,

    /// Login page for unauthenticated callers; 403 when unset
    pub redirect_url: Option<String>,

    /// Cookie holding the session id
    pub session_cookie: String,

    /// Mark the session cookie `Secure`
    pub secure_cookie: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            user_header: crate::config::DEFAULT_USER_HEADER.to_string(),
            redirect_url: None,
            session_cookie: crate::config::DEFAULT_SESSION_COOKIE.to_string(),
            secure_cookie: false,
        }
    }
}

/// Body of a 403 response. Decision details stay in the logs.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    let body = Json(ErrorResponse {
        error: error.to_string(),
        message: message.to_string(),
    });
    (status, body).into_response()
}

fn forbidden() -> Response {
    error_response(
        StatusCode::FORBIDDEN,
        "forbidden",
        "You are not authorized to access this resource",
    )
}

/// Identity asserted by the proxy, with any `@realm` suffix removed
pub fn identity_from_headers(headers: &HeaderMap, header: &str) -> Option<String> {
    let raw = headers.get(header)?.to_str().ok()?.trim();
    let user = raw.split('@').next().unwrap_or(raw);
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

/// Shared state of the guards
#[derive(Clone)]
pub struct AuthnzState {
    engine: Arc<AuthorizationEngine>,
    sessions: Arc<dyn SessionStore>,
    settings: Arc<GuardSettings>,
}

impl AuthnzState {
    pub fn new(
        engine: Arc<AuthorizationEngine>,
        sessions: Arc<dyn SessionStore>,
        settings: GuardSettings,
    ) -> Self {
        Self {
            engine,
            sessions,
            settings: Arc::new(settings),
        }
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Guard for `privilege`; fails now if the application does not declare it
    pub fn require_privilege(&self, privilege: impl Into<String>) -> Result<PrivilegeGuard> {
        let privilege = privilege.into();
        self.engine.check_privilege(&privilege)?;
        Ok(PrivilegeGuard {
            state: self.clone(),
            privilege: Arc::from(privilege),
        })
    }

    pub fn identity(&self, headers: &HeaderMap) -> Option<String> {
        identity_from_headers(headers, &self.settings.user_header)
    }

    /// Session facts of the caller, creating the session cookie if needed
    pub async fn session_facts(
        &self,
        cookies: Option<&Cookies>,
    ) -> Result<(Option<String>, Arc<SessionRoleFacts>)> {
        let Some(cookies) = cookies else {
            return Ok((None, Arc::new(SessionRoleFacts::new())));
        };

        let session_id = match cookies.get(&self.settings.session_cookie) {
            Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
            _ => {
                let session_id = uuid::Uuid::new_v4().to_string();
                let cookie: Cookie<'static> =
                    Cookie::build((self.settings.session_cookie.clone(), session_id.clone()))
                        .path("/")
                        .http_only(true)
                        .secure(self.settings.secure_cookie)
                        .same_site(SameSite::Lax)
                        .build();
                cookies.add(cookie);
                session_id
            }
        };

        let facts = self
            .sessions
            .load(&session_id, self.engine.session_key())
            .await?;
        Ok((Some(session_id), facts))
    }

    /// Response for a caller without identity
    fn unauthenticated(&self, uri: &Uri) -> Response {
        match &self.settings.redirect_url {
            Some(login) => {
                let target = format!("{}?next={}", login, urlencoding::encode(&uri.to_string()));
                Redirect::to(&target).into_response()
            }
            None => forbidden(),
        }
    }
}

/// Privilege check bound to one privilege, validated at construction
#[derive(Clone)]
pub struct PrivilegeGuard {
    state: AuthnzState,
    privilege: Arc<str>,
}

impl PrivilegeGuard {
    pub fn privilege(&self) -> &str {
        &self.privilege
    }
}

/// Let only requests carrying an identity through
pub async fn require_authentication(
    State(state): State<AuthnzState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.identity(request.headers()) {
        Some(user) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        None => {
            warn!("Rejecting unauthenticated request to {}", request.uri());
            state.unauthenticated(request.uri())
        }
    }
}

/// Let only callers holding the guard's privilege through
pub async fn enforce_privilege(
    State(guard): State<PrivilegeGuard>,
    params: Option<RawPathParams>,
    mut request: Request,
    next: Next,
) -> Response {
    let state = &guard.state;

    let Some(user) = state.identity(request.headers()) else {
        warn!(
            "Rejecting unauthenticated request to {} requiring {}",
            request.uri(),
            guard.privilege
        );
        return state.unauthenticated(request.uri());
    };

    let experiment = params.as_ref().and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == EXPERIMENT_PATH_PARAM)
            .map(|(_, value)| value.to_string())
    });
    let scope = AuthorizationScope {
        experiment,
        instrument: request
            .extensions()
            .get::<Instrument>()
            .map(|instrument| instrument.0.clone()),
    };

    let cookies = request.extensions().get::<Cookies>().cloned();
    match authorize_request(state, &user, &guard.privilege, &scope, cookies.as_ref()).await {
        Ok(true) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        Ok(false) => forbidden(),
        Err(e) => {
            error!(
                "Authorization of {} for {} failed: {}",
                user, guard.privilege, e
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Authorization could not be evaluated",
            )
        }
    }
}

/// Run one check against the caller's session facts and save them back
pub async fn authorize_request(
    state: &AuthnzState,
    user: &str,
    privilege: &str,
    scope: &AuthorizationScope,
    cookies: Option<&Cookies>,
) -> std::result::Result<bool, AuthnzError> {
    let (session_id, facts) = state.session_facts(cookies).await?;
    let allowed = state.engine.authorize(user, privilege, scope, &facts).await?;

    if let Some(session_id) = session_id {
        state
            .sessions
            .store(&session_id, state.engine.session_key(), &facts)
            .await?;
    }

    Ok(allowed)
}
