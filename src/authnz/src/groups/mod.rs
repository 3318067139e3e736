//! Group membership resolution
//!
//! A [`GroupResolver`] answers "which groups is this user in" and a few
//! directory-style lookups around it. Backends:
//!
//! - [`DirectoryGroupResolver`]: posixGroup entries of an LDAP directory,
//!   queried through a [`DirectoryClient`] (by default `ldapsearch`)
//! - [`LocalGroupResolver`]: the host's group and passwd files
//! - [`StaticGroupResolver`]: a fixed in-memory map
//!
//! [`CachedGroupResolver`] wraps any of them with a bounded TTL cache for
//! [`GroupResolver::groups_for_user`].
//!
//! Failures are reported as [`GroupResolutionError`](crate::error::GroupResolutionError),
//! never as an empty group set.

mod cached;
mod ldap;
mod local;
mod static_groups;

pub use cached::CachedGroupResolver;
pub use ldap::{
    escape_filter_value, parse_search_response, DirectoryClient, DirectoryGroupResolver,
    DirectoryRecord, LdapSearchClient, DEFAULT_LDAPSEARCH_COMMAND, DEFAULT_QUERY_TIMEOUT,
};
pub use local::{LocalGroupResolver, DEFAULT_GROUP_FILE, DEFAULT_PASSWD_FILE};
pub use static_groups::StaticGroupResolver;

use crate::error::GroupResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// User returned by a user search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Login id
    pub id: String,

    /// Human readable name
    pub display_name: String,

    /// Free-form description (gecos)
    pub description: String,
}

/// Group membership source
#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Groups `user_id` belongs to
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>>;

    /// Members of `group_name`; empty when the group does not exist
    async fn group_members(&self, group_name: &str) -> GroupResult<BTreeSet<String>>;

    /// Group names matching a `*` wildcard pattern
    async fn find_groups_matching(&self, pattern: &str) -> GroupResult<BTreeSet<String>>;

    /// Users whose id matches a `*` wildcard pattern
    async fn find_users_matching(&self, pattern: &str) -> GroupResult<Vec<UserEntry>>;
}

/// Match a value against a pattern where `*` stands for any run of characters
pub(crate) fn matches_wildcard(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        let regex_pattern = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        if let Ok(regex) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return regex.is_match(value);
        }
    }

    pattern == value
}
