//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use authnz::dal::{DocumentRoleStore, InMemoryRoleDocuments, RoleDataAccess};
use authnz::error::{AuthnzError, GroupResult, Result};
use authnz::groups::{GroupResolver, StaticGroupResolver, UserEntry};
use authnz::{AuthorizationScope, PrivilegeRoleMap};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts `groups_for_user` calls of the wrapped resolver
pub struct CountingGroupResolver {
    inner: Arc<dyn GroupResolver>,
    calls: AtomicUsize,
}

impl CountingGroupResolver {
    pub fn new(inner: impl GroupResolver + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupResolver for CountingGroupResolver {
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.groups_for_user(user_id).await
    }

    async fn group_members(&self, group_name: &str) -> GroupResult<BTreeSet<String>> {
        self.inner.group_members(group_name).await
    }

    async fn find_groups_matching(&self, pattern: &str) -> GroupResult<BTreeSet<String>> {
        self.inner.find_groups_matching(pattern).await
    }

    async fn find_users_matching(&self, pattern: &str) -> GroupResult<Vec<UserEntry>> {
        self.inner.find_users_matching(pattern).await
    }
}

/// Role store wrapper that counts `has_role` calls and can be switched to
/// fail every call
pub struct SwitchableStore {
    inner: Arc<dyn RoleDataAccess>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableStore {
    pub fn new(inner: Arc<dyn RoleDataAccess>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleDataAccess for SwitchableStore {
    async fn privileges_for_application_roles(&self, application: &str) -> Result<PrivilegeRoleMap> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthnzError::DataAccess("role database offline".to_string()));
        }
        self.inner.privileges_for_application_roles(application).await
    }

    async fn has_role(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        scope: &AuthorizationScope,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthnzError::DataAccess("role database offline".to_string()));
        }
        self.inner.has_role(user_id, application, role, scope).await
    }

    async fn accepts_global_grants(&self, scope: &AuthorizationScope) -> Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthnzError::DataAccess("role database offline".to_string()));
        }
        self.inner.accepts_global_grants(scope).await
    }
}

/// LogBook with an Editor and a Reader role
pub fn logbook_documents() -> InMemoryRoleDocuments {
    let json = serde_json::json!({
        "site": {
            "roles": [
                {
                    "app": "LogBook",
                    "name": "Editor",
                    "privileges": ["read", "post", "edit", "delete"],
                    "players": ["uid:alice", "group:editors"]
                },
                {
                    "app": "LogBook",
                    "name": "Reader",
                    "privileges": ["read"],
                    "players": ["group:readers"]
                }
            ]
        }
    });
    InMemoryRoleDocuments::from_json_str(&json.to_string()).unwrap()
}

/// Site roles, two instruments, two experiments and a restricted experiment
pub fn facility_documents() -> InMemoryRoleDocuments {
    let json = serde_json::json!({
        "site": {
            "roles": [
                {
                    "app": "LogBook",
                    "name": "Editor",
                    "privileges": ["read", "post", "manage_shifts", "edit", "delete"],
                    "players": ["uid:specific_global_editor", "ps_global_editors"]
                },
                {
                    "app": "LogBook",
                    "name": "Reader",
                    "privileges": ["read"],
                    "players": ["uid:specific_global_reader", "ps_global_readers"]
                },
                {
                    "app": "LogBook",
                    "name": "Operator",
                    "privileges": ["read", "post", "manage_shifts", "edit", "delete", "experiment_switch"],
                    "players": ["uid:PowerUser"]
                }
            ],
            "instruments": [
                {
                    "_id": "XPP",
                    "name": "XPP",
                    "roles": [{ "app": "LogBook", "name": "Operator", "players": ["ps_xpp"] }]
                },
                {
                    "_id": "MEC",
                    "name": "MEC",
                    "roles": [{ "app": "LogBook", "name": "Operator", "players": ["ps_mec"] }]
                }
            ]
        },
        "xpp123456": {
            "info": {},
            "roles": [
                {
                    "app": "LogBook",
                    "name": "Editor",
                    "players": ["uid:specific_xpp123456_editor", "ps_xpp123456_editors"]
                },
                {
                    "app": "LogBook",
                    "name": "Reader",
                    "players": ["uid:specific_xpp123456_reader", "ps_xpp123456_readers"]
                }
            ]
        },
        "mec987654": {
            "info": {},
            "roles": [
                {
                    "app": "LogBook",
                    "name": "Editor",
                    "players": ["uid:specific_mec987654_editor", "ps_mec987654_editors"]
                },
                {
                    "app": "LogBook",
                    "name": "Reader",
                    "players": ["uid:specific_mec987654_reader", "ps_mec987654_readers"]
                }
            ]
        },
        "restricted_experiment": {
            "info": { "params": { "is_restricted": "true" } },
            "roles": [
                {
                    "app": "LogBook",
                    "name": "Editor",
                    "players": ["uid:specific_restricted_editor", "ps_restricted_editors"]
                },
                {
                    "app": "LogBook",
                    "name": "Reader",
                    "players": ["uid:specific_restricted_reader", "ps_restricted_readers"]
                }
            ]
        }
    });
    InMemoryRoleDocuments::from_json_str(&json.to_string()).unwrap()
}

pub fn facility_groups() -> StaticGroupResolver {
    StaticGroupResolver::new()
        .with_user("PowerUser", ["ps_global_editors", "ps_global_readers"])
        .with_user("ReadOnlyUser", ["ps_global_readers"])
        .with_user("xpp123456_PI", ["ps_xpp123456_editors"])
        .with_user("xpp123456_readonly", ["ps_xpp123456_readers"])
        .with_user("xpp_instrument_operator", ["ps_xpp"])
        .with_user("mec_instrument_operator", ["ps_mec"])
}

pub fn logbook_groups() -> StaticGroupResolver {
    StaticGroupResolver::new()
        .with_user("bob", ["editors"])
        .with_user("dave", ["readers"])
        .with_failing_user("mallory")
}

pub fn document_store(
    documents: InMemoryRoleDocuments,
    groups: Arc<dyn GroupResolver>,
) -> Arc<dyn RoleDataAccess> {
    Arc::new(DocumentRoleStore::new(Arc::new(documents), groups))
}
