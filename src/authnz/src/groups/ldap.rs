//! Group membership from an LDAP directory
//!
//! Queries go through a [`DirectoryClient`]; the bundled [`LdapSearchClient`]
//! runs the `ldapsearch` command line tool and parses its LDIF output.

use super::{GroupResolver, UserEntry};
use crate::error::{GroupResolutionError, GroupResult, Result, AuthnzError};
use async_trait::async_trait;
use base64::Engine as _;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Default search command, overridable through configuration
pub const DEFAULT_LDAPSEARCH_COMMAND: &str = "ldapsearch -x";

/// Default time allowed for one directory query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One directory entry: attribute name → values in response order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
    attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; repeated attributes keep their order
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// First value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// All values of an attribute
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Directory query collaborator
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Run `filter`, returning the requested `attributes` of each match
    async fn search(&self, filter: &str, attributes: &[&str]) -> GroupResult<Vec<DirectoryRecord>>;
}

/// Escape a value for use inside an LDAP filter (RFC 4515).
///
/// With `keep_wildcards` the `*` character is passed through so the value
/// can be used as a substring pattern.
pub fn escape_filter_value(value: &str, keep_wildcards: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' if keep_wildcards => escaped.push('*'),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Split `name: value` / `name:: base64` into its parts
fn split_attribute_line(line: &str) -> Option<(&str, &str, bool)> {
    let (name, rest) = line.split_once(':')?;
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ';'));
    if !valid_name {
        return None;
    }

    match rest.strip_prefix(':') {
        Some(encoded) => Some((name, encoded.trim_start(), true)),
        None => Some((name, rest.trim_start(), false)),
    }
}

/// Attribute line waiting for continuation lines before it is decoded
struct PendingValue {
    name: String,
    raw: String,
    base64: bool,
}

fn finish_record(pending: Vec<PendingValue>) -> GroupResult<Option<DirectoryRecord>> {
    let mut record = DirectoryRecord::new();
    for value in pending {
        let decoded = if value.base64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value.raw.trim())
                .map_err(|e| {
                    GroupResolutionError::Malformed(format!("bad base64 in {}: {}", value.name, e))
                })?;
            String::from_utf8(bytes).map_err(|e| {
                GroupResolutionError::Malformed(format!("non utf-8 value in {}: {}", value.name, e))
            })?
        } else {
            value.raw.trim().to_string()
        };
        record.push(value.name, decoded);
    }

    // Search result summaries carry no dn and are not entries
    Ok(record.contains("dn").then_some(record))
}

/// Parse `ldapsearch` LDIF output into records.
///
/// `#` lines are comments, blank lines separate entries, a line starting with
/// a space continues the previous value and `name:: value` carries base64.
/// Only entries with a `dn` are returned.
pub fn parse_search_response(response: &str) -> GroupResult<Vec<DirectoryRecord>> {
    let mut records = Vec::new();
    let mut pending: Vec<PendingValue> = Vec::new();

    for line in response.lines() {
        if line.starts_with('#') {
            continue;
        }

        if line.trim().is_empty() {
            if let Some(record) = finish_record(std::mem::take(&mut pending))? {
                records.push(record);
            }
            continue;
        }

        if let Some(continuation) = line.strip_prefix(' ') {
            match pending.last_mut() {
                Some(last) => last.raw.push_str(continuation),
                None => warn!("Continuation line without attribute in LDAP response: {}", line),
            }
            continue;
        }

        match split_attribute_line(line) {
            Some((name, raw, base64)) => pending.push(PendingValue {
                name: name.to_string(),
                raw: raw.to_string(),
                base64,
            }),
            None => error!("Not matching a line in LDAP response {}", line),
        }
    }

    if let Some(record) = finish_record(pending)? {
        records.push(record);
    }

    Ok(records)
}

/// [`DirectoryClient`] running the `ldapsearch` binary
#[derive(Debug, Clone)]
pub struct LdapSearchClient {
    command: Vec<String>,
    timeout: Duration,
}

impl LdapSearchClient {
    /// Client for an explicit program and argument list
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self> {
        if command.is_empty() {
            return Err(AuthnzError::Config("ldapsearch command is empty".to_string()));
        }
        Ok(Self { command, timeout })
    }

    /// Client for a whitespace separated command line such as `ldapsearch -x -H ldap://host`
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Result<Self> {
        Self::new(
            command_line.split_whitespace().map(str::to_string).collect(),
            timeout,
        )
    }
}

impl Default for LdapSearchClient {
    fn default() -> Self {
        Self {
            command: DEFAULT_LDAPSEARCH_COMMAND
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

#[async_trait]
impl DirectoryClient for LdapSearchClient {
    async fn search(&self, filter: &str, attributes: &[&str]) -> GroupResult<Vec<DirectoryRecord>> {
        debug!("Running LDAP query {:?} {} {:?}", self.command, filter, attributes);

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| GroupResolutionError::Unavailable("empty ldapsearch command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .arg(filter)
            .args(attributes)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| GroupResolutionError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| {
                GroupResolutionError::Unavailable(format!(
                    "error while trying to run LDAP query '{}': {}",
                    filter, e
                ))
            })?;

        if !output.status.success() && output.stdout.is_empty() {
            return Err(GroupResolutionError::Unavailable(format!(
                "LDAP query '{}' failed with {}: {}",
                filter,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let response = String::from_utf8(output.stdout)
            .map_err(|e| GroupResolutionError::Malformed(format!("non utf-8 response: {}", e)))?;

        parse_search_response(&response)
    }
}

/// Group resolver over posixGroup / posixAccount entries
#[derive(Clone)]
pub struct DirectoryGroupResolver {
    client: Arc<dyn DirectoryClient>,
}

impl DirectoryGroupResolver {
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Resolver over the default `ldapsearch -x` command
    pub fn ldapsearch() -> Self {
        Self::new(Arc::new(LdapSearchClient::default()))
    }
}

#[async_trait]
impl GroupResolver for DirectoryGroupResolver {
    async fn groups_for_user(&self, user_id: &str) -> GroupResult<BTreeSet<String>> {
        let filter = format!(
            "(&(objectclass=posixGroup)(memberUid={}))",
            escape_filter_value(user_id, false)
        );
        let groups: BTreeSet<String> = self
            .client
            .search(&filter, &["cn"])
            .await?
            .iter()
            .filter_map(|record| record.first("cn"))
            .map(str::to_string)
            .collect();

        // No groups at all: tell an unknown account from one without groups
        if groups.is_empty() {
            let filter = format!("(uid={})", escape_filter_value(user_id, false));
            if self.client.search(&filter, &["uid"]).await?.is_empty() {
                return Err(GroupResolutionError::UnknownUser(user_id.to_string()));
            }
        }

        debug!("User_id='{}' is member of groups {:?}", user_id, groups);
        Ok(groups)
    }

    async fn group_members(&self, group_name: &str) -> GroupResult<BTreeSet<String>> {
        let filter = format!(
            "(&(objectclass=posixGroup)(cn={}))",
            escape_filter_value(group_name, false)
        );
        let records = self.client.search(&filter, &["memberUid"]).await?;

        let members: BTreeSet<String> = records
            .first()
            .map(|record| record.values("memberUid").iter().cloned().collect())
            .unwrap_or_default();

        debug!("Group '{}' has members {:?}", group_name, members);
        Ok(members)
    }

    async fn find_groups_matching(&self, pattern: &str) -> GroupResult<BTreeSet<String>> {
        let filter = format!(
            "(&(objectclass=posixGroup)(cn={}))",
            escape_filter_value(pattern, true)
        );
        let groups: BTreeSet<String> = self
            .client
            .search(&filter, &["cn"])
            .await?
            .iter()
            .filter_map(|record| record.first("cn"))
            .map(str::to_string)
            .collect();

        debug!("Group pattern '{}' has groups {:?}", pattern, groups);
        Ok(groups)
    }

    async fn find_users_matching(&self, pattern: &str) -> GroupResult<Vec<UserEntry>> {
        let filter = format!("(uid={})", escape_filter_value(pattern, true));
        let records = self.client.search(&filter, &["uid", "cn", "gecos"]).await?;

        let users: Vec<UserEntry> = records
            .iter()
            .filter_map(|record| {
                let id = record.first("uid")?.to_string();
                Some(UserEntry {
                    display_name: record.first("cn").unwrap_or(&id).to_string(),
                    description: record.first("gecos").unwrap_or_default().to_string(),
                    id,
                })
            })
            .collect();

        debug!("Users matching pattern '{}' has entries {:?}", pattern, users);
        Ok(users)
    }
}
