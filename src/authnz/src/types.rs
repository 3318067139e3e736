//! Core authorization types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Application privilege identifier (e.g. "read", "edit")
pub type Privilege = String;

/// Application role name (e.g. "Editor")
pub type RoleName = String;

/// Builds the fully-qualified `application/role` name used as the session key
pub fn fq_role_name(application: &str, role: &str) -> String {
    format!("{}/{}", application, role)
}

/// Reference to whoever plays a role: a single user or a whole group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Player {
    /// Direct user grant, written `uid:<id>`
    User(String),
    /// Group grant, written `gid:<name>`, `group:<name>` or a bare name
    Group(String),
}

impl Player {
    /// Parse a textual player reference
    pub fn parse(raw: &str) -> Self {
        if let Some(uid) = raw.strip_prefix("uid:") {
            Self::User(uid.to_string())
        } else if let Some(gid) = raw.strip_prefix("gid:").or_else(|| raw.strip_prefix("group:")) {
            Self::Group(gid.to_string())
        } else {
            Self::Group(raw.to_string())
        }
    }

    /// Direct user reference
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    /// Group reference
    pub fn group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    pub fn is_user(&self, user_id: &str) -> bool {
        matches!(self, Self::User(id) if id == user_id)
    }

    pub fn as_group(&self) -> Option<&str> {
        match self {
            Self::Group(name) => Some(name),
            Self::User(_) => None,
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "uid:{}", id),
            Self::Group(name) => write!(f, "gid:{}", name),
        }
    }
}

impl FromStr for Player {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for Player {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Player> for String {
    fn from(player: Player) -> Self {
        player.to_string()
    }
}

/// Role definition as stored in a role collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Owning application
    pub app: String,

    /// Role name, unique within the application
    pub name: RoleName,

    /// Privileges granted by this role (only meaningful in the global table)
    #[serde(default)]
    pub privileges: Vec<Privilege>,

    /// Users and groups playing this role
    #[serde(default)]
    pub players: Vec<Player>,
}

impl RoleRecord {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            privileges: Vec::new(),
            players: Vec::new(),
        }
    }

    pub fn with_privileges<I, S>(mut self, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileges.extend(privileges.into_iter().map(Into::into));
        self
    }

    /// Add players from their textual form (`uid:alice`, `editors`, ...)
    pub fn with_players<I, S>(mut self, players: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.players
            .extend(players.into_iter().map(|p| Player::parse(p.as_ref())));
        self
    }

    /// Does this record belong to `application` and carry `role`
    pub fn is_role(&self, application: &str, role: &str) -> bool {
        self.app == application && self.name == role
    }
}

/// Instrument document with its embedded role grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub roles: Vec<RoleRecord>,
}

/// Privilege → roles map for one application.
///
/// Built once at startup and read-only afterwards. Role sets are ordered so
/// iteration (and therefore logging) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeRoleMap {
    entries: HashMap<Privilege, BTreeSet<RoleName>>,
}

impl PrivilegeRoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `role` grants `privilege`
    pub fn add(&mut self, privilege: impl Into<String>, role: impl Into<String>) {
        self.entries
            .entry(privilege.into())
            .or_default()
            .insert(role.into());
    }

    /// Aggregate the privileges declared by a set of role records
    pub fn from_roles<'a, I>(roles: I) -> Self
    where
        I: IntoIterator<Item = &'a RoleRecord>,
    {
        let mut map = Self::new();
        for role in roles {
            for privilege in &role.privileges {
                map.add(privilege.as_str(), role.name.as_str());
            }
        }
        map
    }

    /// Roles granting `privilege`, if any role declares it
    pub fn roles_for(&self, privilege: &str) -> Option<&BTreeSet<RoleName>> {
        self.entries.get(privilege)
    }

    pub fn contains(&self, privilege: &str) -> bool {
        self.entries.contains_key(privilege)
    }

    /// Known privileges, sorted
    pub fn privileges(&self) -> Vec<&str> {
        let mut privileges: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        privileges.sort_unstable();
        privileges
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: Into<String>, R: Into<String>> FromIterator<(P, R)> for PrivilegeRoleMap {
    fn from_iter<T: IntoIterator<Item = (P, R)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (privilege, role) in iter {
            map.add(privilege, role);
        }
        map
    }
}

/// Optional experiment / instrument context of a check.
/// Neither set means the global scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
}

impl AuthorizationScope {
    /// Global scope
    pub fn global() -> Self {
        Self::default()
    }

    pub fn experiment(name: impl Into<String>) -> Self {
        Self {
            experiment: Some(name.into()),
            instrument: None,
        }
    }

    pub fn instrument(id: impl Into<String>) -> Self {
        Self {
            experiment: None,
            instrument: Some(id.into()),
        }
    }

    pub fn with_instrument(mut self, id: impl Into<String>) -> Self {
        self.instrument = Some(id.into());
        self
    }

    /// Empty strings count as absent
    pub fn normalized(self) -> Self {
        Self {
            experiment: self.experiment.filter(|e| !e.is_empty()),
            instrument: self.instrument.filter(|i| !i.is_empty()),
        }
    }

    pub fn is_global(&self) -> bool {
        self.experiment.is_none() && self.instrument.is_none()
    }

    /// The scope under which a confirmed grant is remembered in the session.
    /// Experiment and instrument together are kept as one pair.
    pub fn grant_scope(&self) -> GrantScope {
        match (&self.experiment, &self.instrument) {
            (Some(experiment), Some(instrument)) => GrantScope::Scoped {
                experiment: experiment.clone(),
                instrument: instrument.clone(),
            },
            (Some(experiment), None) => GrantScope::Experiment(experiment.clone()),
            (None, Some(instrument)) => GrantScope::Instrument(instrument.clone()),
            (None, None) => GrantScope::Global,
        }
    }
}

impl fmt::Display for AuthorizationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.experiment, &self.instrument) {
            (None, None) => write!(f, "global"),
            (Some(e), None) => write!(f, "experiment={}", e),
            (None, Some(i)) => write!(f, "instrument={}", i),
            (Some(e), Some(i)) => write!(f, "experiment={} instrument={}", e, i),
        }
    }
}

/// Scope a role grant was confirmed for, as remembered in session facts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GrantScope {
    Global,
    Experiment(String),
    Instrument(String),
    /// Experiment checked together with an instrument
    Scoped { experiment: String, instrument: String },
}
