//! Process-wide TTL cache in front of a group resolver

use super::{GroupResolver, UserEntry};
use crate::cache::{CacheConfig, CacheStats, TtlCache};
use crate::error::GroupResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Caches [`GroupResolver::groups_for_user`] results by user id.
///
/// Lookup failures are never cached, so an unreachable directory is retried
/// on the next call. The other lookups are passed through.
#[derive(Clone)]
pub struct CachedGroupResolver {
    inner: Arc<dyn GroupResolver>,
    cache: TtlCache<String, BTreeSet<String>>,
}

impl CachedGroupResolver {
    pub fn new(inner: Arc<dyn GroupResolver>, config: CacheConfig) -> Self {
        Self {
            inner,
            cache: TtlCache::new(config),
        }
    }

    /// Forget one user's cached membership
    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(&user_id.to_string());
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl GroupResolver for CachedGroupResolver {
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>> {
        self.cache
            .get_or_try_insert_with(user_id.to_string(), || async {
                debug!("Group cache miss for user {}", user_id);
                self.inner.groups_for_user(user_id).await
            })
            .await
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
