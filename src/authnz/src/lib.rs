//! # Authnz
//!
//! Privilege resolution for web services sitting behind an authenticating
//! reverse proxy. The proxy asserts who the caller is; this crate decides
//! whether that caller holds an application privilege, optionally scoped to
//! an experiment or an instrument.
//!
//! ## Features
//!
//! - **Privilege → role map** loaded once per application
//! - **Role backing stores**: documents (in memory or JSON) and PostgreSQL via sqlx
//! - **Group membership** from LDAP (`ldapsearch`) or local account files, behind a TTL cache
//! - **Session facts** so repeated checks in a session skip the backing store
//! - **axum guards** for authentication and per-privilege authorization
//!
//! ## Example
//!
//! ```rust
//! use authnz::dal::{DocumentRoleStore, InMemoryRoleDocuments};
//! use authnz::groups::StaticGroupResolver;
//! use authnz::{AuthorizationEngine, AuthorizationScope, RoleRecord, SessionRoleFacts};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let documents = InMemoryRoleDocuments::new();
//!     documents
//!         .insert_role(
//!             "site",
//!             RoleRecord::new("LogBook", "Editor")
//!                 .with_privileges(["read", "edit"])
//!                 .with_players(["uid:alice", "editors"]),
//!         )
//!         .await;
//!
//!     let groups = StaticGroupResolver::new().with_user("bob", ["editors"]);
//!     let store = DocumentRoleStore::new(Arc::new(documents), Arc::new(groups));
//!     let engine = AuthorizationEngine::new(Arc::new(store), "LogBook").await?;
//!
//!     let facts = SessionRoleFacts::new();
//!     let allowed = engine
//!         .authorize("bob", "edit", &AuthorizationScope::global(), &facts)
//!         .await?;
//!     assert!(allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dal;
pub mod engine;
pub mod error;
pub mod groups;
pub mod guard;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::AuthnzConfig;
pub use dal::RoleDataAccess;
pub use engine::AuthorizationEngine;
pub use error::{AuthnzError, GroupResolutionError, Result};
pub use groups::GroupResolver;
pub use guard::{
    enforce_privilege, require_authentication, AuthenticatedUser, AuthnzState, GuardSettings,
    Instrument, PrivilegeGuard,
};
pub use session::{InMemorySessionStore, SessionRoleFacts, SessionStore};
pub use types::{
    AuthorizationScope, GrantScope, InstrumentRecord, Player, Privilege, PrivilegeRoleMap,
    RoleName, RoleRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
