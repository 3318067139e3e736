//! Role data access over a document store
//!
//! Layout:
//! - `site.roles`: role definitions with privileges and global players
//! - `site.instruments`: instruments with embedded role grants
//! - `<experiment>.roles`: experiment-specific players
//! - `<experiment>.info`: experiment parameters (`params.is_restricted`)

use super::{is_member_of_any, RoleDataAccess};
use crate::error::{AuthnzError, Result};
use crate::groups::GroupResolver;
use crate::types::{AuthorizationScope, InstrumentRecord, Player, PrivilegeRoleMap, RoleRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Database holding role definitions and instruments
pub const SITE_DATABASE: &str = "site";

/// Experiment parameters document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ExperimentInfo {
    /// Info document of a restricted experiment
    pub fn restricted() -> Self {
        let mut params = HashMap::new();
        params.insert("is_restricted".to_string(), serde_json::Value::from("true"));
        Self { params }
    }

    /// `params.is_restricted`, given either as a boolean or as the strings
    /// "true"/"false" in any case. Anything else means not restricted.
    pub fn is_restricted(&self) -> bool {
        match self.params.get("is_restricted") {
            Some(serde_json::Value::Bool(restricted)) => *restricted,
            Some(serde_json::Value::String(raw)) => raw.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Query surface of the document store
#[async_trait]
pub trait RoleDocuments: Send + Sync {
    /// Role records of `<database>.roles` belonging to `application`,
    /// restricted to one role name when given
    async fn find_roles(
        &self,
        database: &str,
        application: &str,
        role: Option<&str>,
    ) -> Result<Vec<RoleRecord>>;

    /// Instrument document by id
    async fn find_instrument(&self, instrument_id: &str) -> Result<Option<InstrumentRecord>>;

    /// Info document of an experiment
    async fn experiment_info(&self, experiment: &str) -> Result<Option<ExperimentInfo>>;
}

/// Contents of one database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseDocuments {
    #[serde(default)]
    pub roles: Vec<RoleRecord>,

    #[serde(default)]
    pub instruments: Vec<InstrumentRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ExperimentInfo>,
}

/// In-memory [`RoleDocuments`] keyed by database name.
///
/// Loadable from a JSON object mapping database names to their contents:
///
/// ```json
/// {
///   "site": { "roles": [...], "instruments": [...] },
///   "xpp123456": { "roles": [...], "info": { "params": { "is_restricted": "false" } } }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoleDocuments {
    databases: Arc<RwLock<HashMap<String, DatabaseDocuments>>>,
}

impl InMemoryRoleDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let databases: HashMap<String, DatabaseDocuments> = serde_json::from_str(json)
            .map_err(|e| AuthnzError::Config(format!("Invalid role documents: {}", e)))?;
        Ok(Self {
            databases: Arc::new(RwLock::new(databases)),
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    /// Add a role record to `<database>.roles`
    pub async fn insert_role(&self, database: &str, role: RoleRecord) {
        let mut databases = self.databases.write().await;
        databases
            .entry(database.to_string())
            .or_default()
            .roles
            .push(role);
    }

    /// Add an instrument to `site.instruments`
    pub async fn insert_instrument(&self, instrument: InstrumentRecord) {
        let mut databases = self.databases.write().await;
        databases
            .entry(SITE_DATABASE.to_string())
            .or_default()
            .instruments
            .push(instrument);
    }

    pub async fn set_experiment_info(&self, experiment: &str, info: ExperimentInfo) {
        let mut databases = self.databases.write().await;
        databases.entry(experiment.to_string()).or_default().info = Some(info);
    }
}

#[async_trait]
impl RoleDocuments for InMemoryRoleDocuments {
    async fn find_roles(
        &self,
        database: &str,
        application: &str,
        role: Option<&str>,
    ) -> Result<Vec<RoleRecord>> {
        let databases = self.databases.read().await;
        Ok(databases
            .get(database)
            .map(|db| {
                db.roles
                    .iter()
                    .filter(|r| r.app == application && role.map_or(true, |name| r.name == name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_instrument(&self, instrument_id: &str) -> Result<Option<InstrumentRecord>> {
        let databases = self.databases.read().await;
        Ok(databases.get(SITE_DATABASE).and_then(|site| {
            site.instruments
                .iter()
                .find(|i| i.id == instrument_id)
                .cloned()
        }))
    }

    async fn experiment_info(&self, experiment: &str) -> Result<Option<ExperimentInfo>> {
        let databases = self.databases.read().await;
        Ok(databases.get(experiment).and_then(|db| db.info.clone()))
    }
}

/// [`RoleDataAccess`] over role documents.
///
/// Players of a role are collected from the global table, the experiment's
/// table and the instrument's embedded roles. A restricted experiment only
/// honours its own table.
pub struct DocumentRoleStore {
    documents: Arc<dyn RoleDocuments>,
    groups: Arc<dyn GroupResolver>,
}

impl DocumentRoleStore {
    pub fn new(documents: Arc<dyn RoleDocuments>, groups: Arc<dyn GroupResolver>) -> Self {
        Self { documents, groups }
    }

    async fn is_restricted(&self, experiment: &str) -> Result<bool> {
        Ok(self
            .documents
            .experiment_info(experiment)
            .await?
            .map(|info| info.is_restricted())
            .unwrap_or(false))
    }

    /// Every player of `role` visible in `scope`
    async fn role_players(
        &self,
        application: &str,
        role: &str,
        scope: &AuthorizationScope,
    ) -> Result<BTreeSet<Player>> {
        let restricted = match &scope.experiment {
            Some(experiment) => self.is_restricted(experiment).await?,
            None => false,
        };

        let mut players = BTreeSet::new();

        if restricted {
            info!(
                "Experiment {:?} is restricted; skipping global and instrument players",
                scope.experiment
            );
        } else {
            for record in self
                .documents
                .find_roles(SITE_DATABASE, application, Some(role))
                .await?
            {
                players.extend(record.players);
            }
        }

        if let Some(experiment) = &scope.experiment {
            for record in self
                .documents
                .find_roles(experiment, application, Some(role))
                .await?
            {
                players.extend(record.players);
            }
        }

        if let Some(instrument_id) = scope.instrument.as_ref().filter(|_| !restricted) {
            if let Some(instrument) = self.documents.find_instrument(instrument_id).await? {
                for record in instrument.roles {
                    if record.is_role(application, role) {
                        players.extend(record.players);
                    }
                }
            }
        }

        Ok(players)
    }
}

#[async_trait]
impl RoleDataAccess for DocumentRoleStore {
    async fn privileges_for_application_roles(&self, application: &str) -> Result<PrivilegeRoleMap> {
        let roles = self
            .documents
            .find_roles(SITE_DATABASE, application, None)
            .await?;
        let map = PrivilegeRoleMap::from_roles(&roles);
        debug!(
            "Loaded {} privileges from {} role records of application {}",
            map.len(),
            roles.len(),
            application
        );
        Ok(map)
    }

    async fn has_role(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        scope: &AuthorizationScope,
    ) -> Result<bool> {
        let players = self.role_players(application, role, scope).await?;

        if players.iter().any(|p| p.is_user(user_id)) {
            info!(
                "User {} directly has role {} in application {} ({})",
                user_id, role, application, scope
            );
            return Ok(true);
        }

        let authorized_groups: BTreeSet<String> = players
            .iter()
            .filter_map(Player::as_group)
            .map(str::to_string)
            .collect();

        debug!(
            "Groups {:?} play role {} in application {} ({})",
            authorized_groups, role, application, scope
        );

        Ok(is_member_of_any(
            self.groups.as_ref(),
            user_id,
            application,
            role,
            &authorized_groups,
        )
        .await)
    }

    async fn accepts_global_grants(&self, scope: &AuthorizationScope) -> Result<bool> {
        match &scope.experiment {
            Some(experiment) => Ok(!self.is_restricted(experiment).await?),
            None => Ok(true),
        }
    }
}
