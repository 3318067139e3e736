//! Per-session role facts and the session store contract
//!
//! A successful role check is remembered in the caller's session as
//! `application/role → {scopes}` so later checks in the same session skip the
//! backing store. Facts grow while one identity uses the session and start
//! over when another identity presents the same session.

use crate::cache::{CacheConfig, TtlCache};
use crate::error::Result;
use crate::types::{AuthorizationScope, GrantScope};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

type FactMap = HashMap<String, BTreeSet<GrantScope>>;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct FactState {
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    roles: FactMap,
}

impl FactState {
    /// Roles of `user_id`; `None` when the facts belong to someone else
    fn roles_of(&self, user_id: &str) -> Option<&FactMap> {
        (self.owner.as_deref() == Some(user_id)).then_some(&self.roles)
    }
}

/// Role grants confirmed for one session.
///
/// Facts belong to the identity that earned them. A check by any other
/// identity sees no facts, and the first grant it records replaces the
/// previous owner's facts. Interior mutability lets concurrent requests of
/// the same session share one instance; every access goes through the mutex.
#[derive(Debug, Default)]
pub struct SessionRoleFacts {
    state: Mutex<FactState>,
}

impl SessionRoleFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity the facts were recorded for
    pub fn owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    /// Is `fq_role` already known to hold for `user_id` in exactly `scope`.
    ///
    /// An unscoped check is satisfied by any recorded grant of the role.
    /// Global grants are not consulted for scoped checks; see
    /// [`has_global_grant`](Self::has_global_grant).
    pub fn is_satisfied(&self, user_id: &str, fq_role: &str, scope: &AuthorizationScope) -> bool {
        let state = self.state.lock();
        let Some(scopes) = state.roles_of(user_id).and_then(|roles| roles.get(fq_role)) else {
            return false;
        };

        scope.is_global() || scopes.contains(&scope.grant_scope())
    }

    /// Has `fq_role` been confirmed globally for `user_id`
    pub fn has_global_grant(&self, user_id: &str, fq_role: &str) -> bool {
        self.state
            .lock()
            .roles_of(user_id)
            .and_then(|roles| roles.get(fq_role))
            .map_or(false, |scopes| scopes.contains(&GrantScope::Global))
    }

    /// Remember that `fq_role` holds for `user_id` in `scope`; returns false
    /// if already known. Facts of another owner are dropped first.
    pub fn record(&self, user_id: &str, fq_role: &str, scope: &AuthorizationScope) -> bool {
        let mut state = self.state.lock();
        if state.owner.as_deref() != Some(user_id) {
            state.owner = Some(user_id.to_string());
            state.roles.clear();
        }

        state
            .roles
            .entry(fq_role.to_string())
            .or_default()
            .insert(scope.grant_scope())
    }

    /// Scopes recorded for a role
    pub fn scopes_for(&self, fq_role: &str) -> Option<BTreeSet<GrantScope>> {
        self.state.lock().roles.get(fq_role).cloned()
    }

    /// Add every fact of `other`. Facts of a different owner replace ours.
    pub fn merge(&self, other: &SessionRoleFacts) {
        if std::ptr::eq(self, other) {
            return;
        }

        let incoming = other.state.lock().clone();
        let mut state = self.state.lock();
        if incoming.owner != state.owner {
            *state = incoming;
            return;
        }
        for (fq_role, scopes) in incoming.roles {
            state.roles.entry(fq_role).or_default().extend(scopes);
        }
    }

    /// Copy of the current facts
    pub fn snapshot(&self) -> HashMap<String, BTreeSet<GrantScope>> {
        self.state.lock().roles.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().roles.is_empty()
    }
}

impl Clone for SessionRoleFacts {
    fn clone(&self) -> Self {
        Self {
            state: Mutex::new(self.state.lock().clone()),
        }
    }
}

impl PartialEq for SessionRoleFacts {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let ours = self.state.lock().clone();
        ours == *other.state.lock()
    }
}

impl Serialize for SessionRoleFacts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.state.lock().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SessionRoleFacts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let state = FactState::deserialize(deserializer)?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

/// Storage of session facts, one entry per (session, key)
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Facts stored for `session_id` under `key`, empty if there are none yet
    async fn load(&self, session_id: &str, key: &str) -> Result<Arc<SessionRoleFacts>>;

    /// Persist facts after a request used them
    async fn store(&self, session_id: &str, key: &str, facts: &SessionRoleFacts) -> Result<()>;
}

/// Default idle lifetime of an in-memory session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Process-local session store.
///
/// Concurrent requests of one session receive the same shared instance, so
/// facts recorded by one request are visible to the others immediately.
/// Sessions idle for longer than the TTL are dropped.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: TtlCache<(String, String), Arc<SessionRoleFacts>>,
}

impl InMemorySessionStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            sessions: TtlCache::new(config),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(CacheConfig {
            capacity: 10_000,
            ttl: DEFAULT_SESSION_TTL,
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str, key: &str) -> Result<Arc<SessionRoleFacts>> {
        let cache_key = (session_id.to_string(), key.to_string());
        if let Some(facts) = self.sessions.get(&cache_key) {
            return Ok(facts);
        }

        let facts = Arc::new(SessionRoleFacts::new());
        self.sessions.insert(cache_key, facts.clone());
        Ok(facts)
    }

    async fn store(&self, session_id: &str, key: &str, facts: &SessionRoleFacts) -> Result<()> {
        let cache_key = (session_id.to_string(), key.to_string());
        let stored = match self.sessions.get(&cache_key) {
            Some(existing) => {
                existing.merge(facts);
                existing
            }
            None => Arc::new(facts.clone()),
        };

        // Re-inserting restarts the idle timer
        self.sessions.insert(cache_key, stored);
        Ok(())
    }
}
