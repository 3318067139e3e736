//! Role data access
//!
//! Answers two questions for the engine: which roles grant which privileges
//! of an application, and whether a user plays a role in a scope. Direct
//! user grants are checked before any group lookup; group players are only
//! resolved when at least one authorized group exists.

pub mod document;
#[cfg(feature = "postgres")]
pub mod sql;

pub use document::{DocumentRoleStore, ExperimentInfo, InMemoryRoleDocuments, RoleDocuments};
#[cfg(feature = "postgres")]
pub use sql::SqlRoleStore;

use crate::error::Result;
use crate::groups::GroupResolver;
use crate::types::{AuthorizationScope, PrivilegeRoleMap};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Backing store of role definitions and grants
#[async_trait]
pub trait RoleDataAccess: Send + Sync {
    /// Privilege → roles map of every role declared by `application`
    async fn privileges_for_application_roles(&self, application: &str) -> Result<PrivilegeRoleMap>;

    /// Does `user_id` play `role` of `application` within `scope`.
    ///
    /// Global grants always count; experiment and instrument grants count
    /// when the scope names them. Group lookup failures answer `false`.
    async fn has_role(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        scope: &AuthorizationScope,
    ) -> Result<bool>;

    /// Do global role grants count within `scope`.
    ///
    /// Backends that can narrow a scope to its own grants answer `false`
    /// for it, so a global session fact is not reused there.
    async fn accepts_global_grants(&self, _scope: &AuthorizationScope) -> Result<bool> {
        Ok(true)
    }
}

/// Is `user_id` a member of any of `authorized_groups`.
///
/// An empty set answers `false` without asking the resolver. A resolver
/// failure is logged and answers `false`.
pub(crate) async fn is_member_of_any(
    resolver: &dyn GroupResolver,
    user_id: &str,
    application: &str,
    role: &str,
    authorized_groups: &BTreeSet<String>,
) -> bool {
    if authorized_groups.is_empty() {
        debug!(
            "No group players for role {} in application {}; skipping group lookup",
            role, application
        );
        return false;
    }

    match resolver.groups_for_user(user_id).await {
        Ok(user_groups) => {
            let matched = user_groups
                .iter()
                .find(|group| authorized_groups.contains(group.as_str()));
            if let Some(group) = matched {
                debug!(
                    "User {} plays role {}/{} through group {}",
                    user_id, application, role, group
                );
                true
            } else {
                false
            }
        }
        Err(e) => {
            warn!(
                "Cannot resolve groups of user {} while checking role {}/{}: {}",
                user_id, application, role, e
            );
            false
        }
    }
}
