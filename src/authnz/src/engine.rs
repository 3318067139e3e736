//! Privilege resolution engine
//!
//! Resolves "does this caller hold privilege P (in this scope)" into "does
//! the caller play any role granting P", consulting the session facts first
//! and the role backing store second.
//!
//! ```text
//! privilege ─→ PrivilegeRoleMap ─→ {roles}
//!                                    │
//!                        SessionRoleFacts hit? ──yes──→ allow
//!                                    │ no
//!                    RoleDataAccess::has_role ──yes──→ record + allow
//!                                    │ no
//!                                  deny
//! ```

use crate::dal::RoleDataAccess;
use crate::error::{AuthnzError, Result};
use crate::session::SessionRoleFacts;
use crate::types::{fq_role_name, AuthorizationScope, PrivilegeRoleMap, RoleName};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the session key holding an application's role facts
pub const SESSION_KEY_PREFIX: &str = "APPLICATION_ROLES_";

/// Authorization engine for one application.
///
/// The privilege → roles map is loaded once at construction and never
/// changes. The engine itself holds no per-request state; session facts are
/// passed into every check.
pub struct AuthorizationEngine {
    application: String,
    session_key: String,
    privileges: PrivilegeRoleMap,
    dal: Arc<dyn RoleDataAccess>,
}

impl AuthorizationEngine {
    /// Load the privilege map of `application`.
    ///
    /// Fails with [`AuthnzError::Initialization`] if the backing store
    /// cannot be queried; an application must not start without its map.
    pub async fn new(dal: Arc<dyn RoleDataAccess>, application: impl Into<String>) -> Result<Self> {
        let application = application.into();

        let privileges = dal
            .privileges_for_application_roles(&application)
            .await
            .map_err(|e| AuthnzError::Initialization {
                application: application.clone(),
                reason: e.to_string(),
            })?;

        if privileges.is_empty() {
            warn!("Application {} declares no privileges; every check will fail", application);
        }
        info!(
            "Loaded privileges for application {}: {:?}",
            application,
            privileges.privileges()
        );

        Ok(Self {
            session_key: format!("{}{}", SESSION_KEY_PREFIX, application),
            application,
            privileges,
            dal,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Session key under which this application's role facts live
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// The loaded privilege → roles map
    pub fn privileges(&self) -> &PrivilegeRoleMap {
        &self.privileges
    }

    /// Roles granting `privilege`
    pub fn roles_for(&self, privilege: &str) -> Option<&BTreeSet<RoleName>> {
        self.privileges.roles_for(privilege)
    }

    /// A present, non-empty identity is authenticated
    pub fn is_authenticated(&self, identity: Option<&str>) -> bool {
        identity.map_or(false, |id| !id.is_empty())
    }

    /// Validate that `privilege` is declared by some role of the application.
    ///
    /// Guards call this when they are built so a typo fails at startup.
    pub fn check_privilege(&self, privilege: &str) -> Result<&BTreeSet<RoleName>> {
        self.privileges
            .roles_for(privilege)
            .ok_or_else(|| AuthnzError::UnknownPrivilege {
                application: self.application.clone(),
                privilege: privilege.to_string(),
                known: self.privileges.privileges().join(", "),
            })
    }

    /// Does `identity` hold `privilege` within `scope`.
    ///
    /// Any granting role suffices. Facts already in `facts` for `identity`
    /// answer without a backing store query; a role confirmed by the store
    /// is recorded in `facts` under the check's scope. Backing store
    /// failures deny the affected role and are logged, they never grant.
    pub async fn authorize(
        &self,
        identity: &str,
        privilege: &str,
        scope: &AuthorizationScope,
        facts: &SessionRoleFacts,
    ) -> Result<bool> {
        let roles = self.check_privilege(privilege)?;
        let scope = scope.clone().normalized();

        if identity.is_empty() {
            warn!(
                "Denying privilege {} ({}) of application {} to an anonymous caller",
                privilege, scope, self.application
            );
            return Ok(false);
        }

        let mut global_grants_apply = None;
        for role in roles {
            let fq_role = fq_role_name(&self.application, role);
            if facts.is_satisfied(identity, &fq_role, &scope) {
                debug!(
                    "Session of {} already has role {} for privilege {} ({})",
                    identity, fq_role, privilege, scope
                );
                return Ok(true);
            }

            if scope.is_global() || !facts.has_global_grant(identity, &fq_role) {
                continue;
            }
            let applies = match global_grants_apply {
                Some(applies) => applies,
                None => {
                    let applies = self.global_grants_apply(&scope).await;
                    global_grants_apply = Some(applies);
                    applies
                }
            };
            if applies {
                debug!(
                    "Session of {} has global role {} for privilege {} ({})",
                    identity, fq_role, privilege, scope
                );
                return Ok(true);
            }
        }

        for role in roles {
            let fq_role = fq_role_name(&self.application, role);
            match self
                .dal
                .has_role(identity, &self.application, role, &scope)
                .await
            {
                Ok(true) => {
                    facts.record(identity, &fq_role, &scope);
                    info!(
                        "User {} has role {} granting privilege {} ({})",
                        identity, fq_role, privilege, scope
                    );
                    return Ok(true);
                }
                Ok(false) => {
                    debug!("User {} does not have role {} ({})", identity, fq_role, scope);
                }
                Err(e) => {
                    warn!(
                        "Could not check role {} of user {} ({}): {}",
                        fq_role, identity, scope, e
                    );
                }
            }
        }

        warn!(
            "User {} lacks privilege {} of application {} ({}); roles checked: {:?}",
            identity, privilege, self.application, scope, roles
        );
        Ok(false)
    }

    /// Whether a global session fact may answer a check in `scope`.
    /// A store failure answers `false`, which sends the check to the store.
    async fn global_grants_apply(&self, scope: &AuthorizationScope) -> bool {
        match self.dal.accepts_global_grants(scope).await {
            Ok(applies) => {
                if !applies {
                    debug!("Global grants do not apply in {}", scope);
                }
                applies
            }
            Err(e) => {
                warn!("Could not tell whether global grants apply in {}: {}", scope, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("application", &self.application)
            .field("privileges", &self.privileges)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedStore {
        grants: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl RoleDataAccess for FixedStore {
        async fn privileges_for_application_roles(&self, _application: &str) -> Result<PrivilegeRoleMap> {
            Ok([("read", "Reader"), ("read", "Editor"), ("edit", "Editor")]
                .into_iter()
                .collect())
        }

        async fn has_role(
            &self,
            user_id: &str,
            _application: &str,
            role: &str,
            _scope: &AuthorizationScope,
        ) -> Result<bool> {
            Ok(self.grants.iter().any(|(u, r)| *u == user_id && *r == role))
        }
    }

    async fn engine() -> AuthorizationEngine {
        let store = FixedStore {
            grants: vec![("alice", "Editor"), ("carol", "Reader")],
        };
        AuthorizationEngine::new(Arc::new(store), "LogBook").await.unwrap()
    }

    #[tokio::test]
    async fn test_accessors() {
        let engine = engine().await;

        assert_eq!(engine.application(), "LogBook");
        assert_eq!(engine.session_key(), "APPLICATION_ROLES_LogBook");
        assert_eq!(engine.privileges().privileges(), vec!["edit", "read"]);
        assert_eq!(engine.roles_for("read").unwrap().len(), 2);
        assert!(engine.check_privilege("edit").is_ok());
        assert!(engine.check_privilege("fly").unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_is_authenticated() {
        let engine = engine().await;

        assert!(engine.is_authenticated(Some("alice")));
        assert!(!engine.is_authenticated(Some("")));
        assert!(!engine.is_authenticated(None));
    }

    #[tokio::test]
    async fn test_authorize_records_fact() {
        let engine = engine().await;
        let facts = SessionRoleFacts::new();
        let global = AuthorizationScope::global();

        assert!(engine.authorize("carol", "read", &global, &facts).await.unwrap());
        assert!(!engine.authorize("carol", "edit", &global, &facts).await.unwrap());
        assert!(facts.scopes_for("LogBook/Reader").is_some());
        assert!(facts.scopes_for("LogBook/Editor").is_none());
    }

    #[tokio::test]
    async fn test_anonymous_is_denied() {
        let engine = engine().await;
        let facts = SessionRoleFacts::new();

        assert!(!engine
            .authorize("", "read", &AuthorizationScope::global(), &facts)
            .await
            .unwrap());
        assert!(engine
            .authorize("", "fly", &AuthorizationScope::global(), &facts)
            .await
            .is_err());
    }
}
