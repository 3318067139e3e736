//! Fixed in-memory group membership

use super::{matches_wildcard, GroupResolver, UserEntry};
use crate::error::{GroupResolutionError, GroupResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// Group resolver over a fixed user → groups map.
///
/// Users missing from the map belong to no group. Individual users can be
/// marked as failing to simulate an unreachable directory.
#[derive(Debug, Clone, Default)]
pub struct StaticGroupResolver {
    memberships: HashMap<String, BTreeSet<String>>,
    failing_users: BTreeSet<String>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to each of `groups`
    pub fn with_user<I, S>(mut self, user_id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memberships
            .entry(user_id.into())
            .or_default()
            .extend(groups.into_iter().map(Into::into));
        self
    }

    /// Make every lookup for `user_id` fail
    pub fn with_failing_user(mut self, user_id: impl Into<String>) -> Self {
        self.failing_users.insert(user_id.into());
        self
    }
}

#[async_trait]
impl GroupResolver for StaticGroupResolver {
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>> {
        if self.failing_users.contains(user_id) {
            return Err(GroupResolutionError::Unavailable(format!(
                "lookup for {} is configured to fail",
                user_id
            )));
        }
        Ok(self.memberships.get(user_id).cloned().unwrap_or_default())
    }

    async fn group_members(&self, group_name: &str) -> GroupResult<BTreeSet<String>> {
        Ok(self
            .memberships
            .iter()
            .filter(|(_, groups)| groups.contains(group_name))
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn find_groups_matching(&self, pattern: &str) -> GroupResult<BTreeSet<String>> {
        Ok(self
            .memberships
            .values()
            .flatten()
            .filter(|group| matches_wildcard(pattern, group))
            .cloned()
            .collect())
    }

    async fn find_users_matching(&self, pattern: &str) -> GroupResult<Vec<UserEntry>> {
        let mut users: Vec<UserEntry> = self
            .memberships
            .keys()
            .filter(|user| matches_wildcard(pattern, user))
            .map(|user| UserEntry {
                id: user.clone(),
                display_name: user.clone(),
                description: String::new(),
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> StaticGroupResolver {
        StaticGroupResolver::new()
            .with_user("bob", ["editors"])
            .with_user("dave", ["editors", "readers"])
            .with_failing_user("mallory")
    }

    #[tokio::test]
    async fn test_static_lookups() {
        let resolver = resolver();

        assert_eq!(
            resolver.groups_for_user("dave").await.unwrap(),
            BTreeSet::from(["editors".to_string(), "readers".to_string()])
        );
        assert!(resolver.groups_for_user("carol").await.unwrap().is_empty());
        assert_eq!(
            resolver.group_members("editors").await.unwrap(),
            BTreeSet::from(["bob".to_string(), "dave".to_string()])
        );
        assert_eq!(resolver.find_groups_matching("read*").await.unwrap().len(), 1);
        assert_eq!(resolver.find_users_matching("d*").await.unwrap()[0].id, "dave");
    }

    #[tokio::test]
    async fn test_failing_user() {
        let err = resolver().groups_for_user("mallory").await.unwrap_err();
        assert!(matches!(err, GroupResolutionError::Unavailable(_)));
    }
}
