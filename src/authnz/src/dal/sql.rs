//! PostgreSQL role store
//!
//! Tables: `role(id, app, name)`, `priv(name, role_id)` and
//! `"user"(user, role_id, exp_id)` where `user` is `uid:<id>` or
//! `gid:<group>`. A grant with `exp_id IS NULL` is global. Experiment names
//! are resolved to ids through `regdb.experiment`.

use super::{is_member_of_any, RoleDataAccess};
use crate::cache::{CacheConfig, TtlCache};
use crate::error::{AuthnzError, Result};
use crate::groups::GroupResolver;
use crate::types::{AuthorizationScope, PrivilegeRoleMap};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SELECT_PRIVILEGES_AND_ROLES: &str = r#"
    SELECT p.name AS priv_name, r.name AS role_name
    FROM role r
    INNER JOIN priv p ON p.role_id = r.id
    WHERE r.app = $1
    ORDER BY p.name, r.name
"#;

const SELECT_EXPERIMENT_ID: &str = "SELECT id FROM regdb.experiment WHERE name = $1";

const SELECT_USER_WITH_ROLE: &str = r#"
    SELECT 1
    FROM "user" u
    INNER JOIN role r ON u.role_id = r.id
    WHERE r.app = $1
      AND r.name = $2
      AND u."user" = $3
      AND (u.exp_id IS NULL OR u.exp_id = $4)
    LIMIT 1
"#;

const SELECT_GROUPS_WITH_ROLE: &str = r#"
    SELECT DISTINCT SUBSTRING(u."user" FROM 5) AS group_id
    FROM "user" u
    INNER JOIN role r ON u.role_id = r.id
    WHERE r.app = $1
      AND r.name = $2
      AND u."user" LIKE 'gid:%'
      AND (u.exp_id IS NULL OR u.exp_id = $3)
"#;

/// Experiment name → id cache settings
pub const EXPERIMENT_ID_CACHE: CacheConfig = CacheConfig {
    capacity: 1000,
    ttl: Duration::from_secs(600),
};

/// [`RoleDataAccess`] backed by PostgreSQL.
///
/// Instrument scope has no representation in this schema and is ignored.
pub struct SqlRoleStore {
    pool: PgPool,
    groups: Arc<dyn GroupResolver>,
    experiment_ids: TtlCache<String, Option<i64>>,
}

impl SqlRoleStore {
    /// Connect to the role database
    pub async fn connect(database_url: &str, groups: Arc<dyn GroupResolver>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AuthnzError::DataAccess(format!("Failed to connect to database: {}", e)))?;

        Ok(Self::with_pool(pool, groups))
    }

    /// Store over an existing pool
    pub fn with_pool(pool: PgPool, groups: Arc<dyn GroupResolver>) -> Self {
        Self {
            pool,
            groups,
            experiment_ids: TtlCache::new(EXPERIMENT_ID_CACHE),
        }
    }

    /// Create the role tables if they are missing
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AuthnzError::DataAccess(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Id of an experiment, `None` if no experiment has that name
    pub async fn experiment_id(&self, experiment: &str) -> Result<Option<i64>> {
        self.experiment_ids
            .get_or_try_insert_with(experiment.to_string(), || async {
                let row = sqlx::query(SELECT_EXPERIMENT_ID)
                    .bind(experiment)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        AuthnzError::DataAccess(format!("Failed to look up experiment id: {}", e))
                    })?;

                row.map(|r| r.try_get::<i64, _>("id"))
                    .transpose()
                    .map_err(|e| AuthnzError::DataAccess(format!("Failed to read experiment id: {}", e)))
            })
            .await
    }

    async fn scope_experiment_id(&self, scope: &AuthorizationScope) -> Result<Option<i64>> {
        match &scope.experiment {
            Some(experiment) => {
                let id = self.experiment_id(experiment).await?;
                if id.is_none() {
                    debug!("Unknown experiment {}; only global grants apply", experiment);
                }
                Ok(id)
            }
            None => Ok(None),
        }
    }

    async fn has_direct_grant(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        experiment_id: Option<i64>,
    ) -> Result<bool> {
        let row = sqlx::query(SELECT_USER_WITH_ROLE)
            .bind(application)
            .bind(role)
            .bind(format!("uid:{}", user_id))
            .bind(experiment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthnzError::DataAccess(format!("Failed to check user grant: {}", e)))?;

        Ok(row.is_some())
    }

    async fn groups_with_role(
        &self,
        application: &str,
        role: &str,
        experiment_id: Option<i64>,
    ) -> Result<BTreeSet<String>> {
        let rows = sqlx::query(SELECT_GROUPS_WITH_ROLE)
            .bind(application)
            .bind(role)
            .bind(experiment_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuthnzError::DataAccess(format!("Failed to list group grants: {}", e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("group_id")
                    .map_err(|e| AuthnzError::DataAccess(format!("Failed to read group grant: {}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl RoleDataAccess for SqlRoleStore {
    async fn privileges_for_application_roles(&self, application: &str) -> Result<PrivilegeRoleMap> {
        let rows = sqlx::query(SELECT_PRIVILEGES_AND_ROLES)
            .bind(application)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuthnzError::DataAccess(format!("Failed to load privileges: {}", e)))?;

        let mut map = PrivilegeRoleMap::new();
        for row in rows {
            let privilege: String = row
                .try_get("priv_name")
                .map_err(|e| AuthnzError::DataAccess(format!("Failed to read privilege: {}", e)))?;
            let role: String = row
                .try_get("role_name")
                .map_err(|e| AuthnzError::DataAccess(format!("Failed to read role: {}", e)))?;
            map.add(privilege, role);
        }

        Ok(map)
    }

    async fn has_role(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        scope: &AuthorizationScope,
    ) -> Result<bool> {
        let experiment_id = self.scope_experiment_id(scope).await?;

        if self
            .has_direct_grant(user_id, application, role, experiment_id)
            .await?
        {
            info!(
                "User {} directly has role {} in application {} ({})",
                user_id, role, application, scope
            );
            return Ok(true);
        }

        let authorized_groups = self.groups_with_role(application, role, experiment_id).await?;
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
}
