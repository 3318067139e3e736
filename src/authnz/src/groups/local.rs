//! Group membership from the local account files

use super::{matches_wildcard, GroupResolver, UserEntry};
use crate::error::{GroupResolutionError, GroupResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default location of the group database
pub const DEFAULT_GROUP_FILE: &str = "/etc/group";

/// Default location of the user database
pub const DEFAULT_PASSWD_FILE: &str = "/etc/passwd";

/// `name:password:gid:member,member`
#[derive(Debug, Clone)]
struct GroupLine {
    name: String,
    gid: String,
    members: Vec<String>,
}

/// `name:password:uid:gid:gecos:home:shell`
#[derive(Debug, Clone)]
struct PasswdLine {
    name: String,
    gid: String,
    gecos: String,
}

/// Resolves groups from `group(5)` / `passwd(5)` formatted files.
///
/// A user's groups are the supplementary groups listing them plus their
/// primary group. Files are re-read on every call; wrap in a
/// [`CachedGroupResolver`](super::CachedGroupResolver) to avoid that.
#[derive(Debug, Clone)]
pub struct LocalGroupResolver {
    group_file: PathBuf,
    passwd_file: PathBuf,
}

impl LocalGroupResolver {
    /// Resolver over the system files
    pub fn new() -> Self {
        Self::with_files(DEFAULT_GROUP_FILE, DEFAULT_PASSWD_FILE)
    }

    /// Resolver over custom group and passwd files
    pub fn with_files(group_file: impl Into<PathBuf>, passwd_file: impl Into<PathBuf>) -> Self {
        Self {
            group_file: group_file.into(),
            passwd_file: passwd_file.into(),
        }
    }

    async fn read_groups(&self) -> GroupResult<Vec<GroupLine>> {
        let content = read_account_file(&self.group_file).await?;
        Ok(parse_lines(&content, 4, &self.group_file)
            .map(|fields| GroupLine {
                name: fields[0].to_string(),
                gid: fields[2].to_string(),
                members: fields[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
            .collect())
    }

    async fn read_users(&self) -> GroupResult<Vec<PasswdLine>> {
        let content = read_account_file(&self.passwd_file).await?;
        Ok(parse_lines(&content, 7, &self.passwd_file)
            .map(|fields| PasswdLine {
                name: fields[0].to_string(),
                gid: fields[3].to_string(),
                gecos: fields[4].to_string(),
            })
            .collect())
    }
}

impl Default for LocalGroupResolver {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_account_file(path: &Path) -> GroupResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        GroupResolutionError::Unavailable(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Colon separated records with at least `min_fields` fields
fn parse_lines<'a>(
    content: &'a str,
    min_fields: usize,
    path: &'a Path,
) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(move |line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < min_fields {
                warn!("Skipping malformed line in {}: {}", path.display(), line);
                None
            } else {
                Some(fields)
            }
        })
}

#[async_trait]
impl GroupResolver for LocalGroupResolver {
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>> {
        let users = self.read_users().await?;
        let user = users
            .iter()
            .find(|u| u.name == user_id)
            .ok_or_else(|| GroupResolutionError::UnknownUser(user_id.to_string()))?;

        let groups: BTreeSet<String> = self
            .read_groups()
            .await?
            .into_iter()
            .filter(|g| g.gid == user.gid || g.members.iter().any(|m| m == user_id))
            .map(|g| g.name)
            .collect();

        debug!("User_id='{}' is member of groups {:?}", user_id, groups);
        Ok(groups)
    }

    async fn group_members(&self, group_name: &str) -> GroupResult<BTreeSet<String>> {
        let groups = self.read_groups().await?;
        let Some(group) = groups.into_iter().find(|g| g.name == group_name) else {
            return Ok(BTreeSet::new());
        };

        let mut members: BTreeSet<String> = group.members.into_iter().collect();
        members.extend(
            self.read_users()
                .await?
                .into_iter()
                .filter(|u| u.gid == group.gid)
                .map(|u| u.name),
        );

        debug!("Group '{}' has members {:?}", group_name, members);
        Ok(members)
    }

    async fn find_groups_matching(&self, pattern: &str) -> GroupResult<BTreeSet<String>> {
        Ok(self
            .read_groups()
            .await?
            .into_iter()
            .filter(|g| matches_wildcard(pattern, &g.name))
            .map(|g| g.name)
            .collect())
    }

    async fn find_users_matching(&self, pattern: &str) -> GroupResult<Vec<UserEntry>> {
        Ok(self
            .read_users()
            .await?
            .into_iter()
            .filter(|u| matches_wildcard(pattern, &u.name))
            .map(|u| {
                let display_name = u
                    .gecos
                    .split(',')
                    .next()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(&u.name)
                    .to_string();
                UserEntry {
                    id: u.name,
                    display_name,
                    description: u.gecos,
                }
            })
            .collect())
    }
}
