//! Environment configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `8080` |
//! | `AUTHNZ_APPLICATION` | `LogBook` |
//! | `AUTHNZ_USER_HEADER` | `REMOTE_USER` |
//! | `AUTHNZ_REDIRECT_URL` | unset (403 instead of redirect) |
//! | `AUTHNZ_SESSION_COOKIE` | `authnz_session` |
//! | `AUTHNZ_SESSION_TTL` | `28800` seconds |
//! | `AUTHNZ_SECURE_COOKIE` | `false` |
//! | `AUTHNZ_GROUP_BACKEND` | `ldap` (`ldap` or `local`) |
//! | `AUTHNZ_LDAPSEARCH_COMMAND` | `ldapsearch -x` |
//! | `AUTHNZ_LDAP_TIMEOUT` | `10` seconds |
//! | `AUTHNZ_GROUP_CACHE_SIZE` | `1000` |
//! | `AUTHNZ_GROUP_CACHE_TTL` | `600` seconds |
//! | `AUTHNZ_GROUP_FILE` | `/etc/group` |
//! | `AUTHNZ_PASSWD_FILE` | `/etc/passwd` |
//! | `AUTHNZ_ROLES_FILE` | unset |
//! | `DATABASE_URL` | unset |

use crate::cache::CacheConfig;
use crate::error::{AuthnzError, Result};
use crate::groups::{
    CachedGroupResolver, DirectoryGroupResolver, GroupResolver, LdapSearchClient,
    LocalGroupResolver, DEFAULT_GROUP_FILE, DEFAULT_LDAPSEARCH_COMMAND, DEFAULT_PASSWD_FILE,
    DEFAULT_QUERY_TIMEOUT,
};
use crate::guard::GuardSettings;
use crate::session::DEFAULT_SESSION_TTL;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default identity header set by the authenticating proxy
pub const DEFAULT_USER_HEADER: &str = "REMOTE_USER";

/// Default session cookie name
pub const DEFAULT_SESSION_COOKIE: &str = "authnz_session";

/// Where group membership comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBackend {
    Ldap,
    Local,
}

impl FromStr for GroupBackend {
    type Err = AuthnzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ldap" => Ok(Self::Ldap),
            "local" => Ok(Self::Local),
            other => Err(AuthnzError::Config(format!(
                "unknown group backend '{}', expected 'ldap' or 'local'",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ldap => write!(f, "ldap"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct AuthnzConfig {
    pub port: u16,
    pub application: String,
    pub user_header: String,
    pub redirect_url: Option<String>,
    pub session_cookie: String,
    pub session_ttl: Duration,
    /// Send the session cookie over HTTPS only
    pub secure_cookie: bool,
    pub group_backend: GroupBackend,
    pub ldapsearch_command: String,
    pub ldap_timeout: Duration,
    pub group_cache: CacheConfig,
    pub group_file: PathBuf,
    pub passwd_file: PathBuf,
    /// JSON role documents for the in-memory document store
    pub roles_file: Option<PathBuf>,
    /// PostgreSQL role database; takes precedence over `roles_file`
    pub database_url: Option<String>,
}

impl Default for AuthnzConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            application: "LogBook".to_string(),
            user_header: DEFAULT_USER_HEADER.to_string(),
            redirect_url: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
            secure_cookie: false,
            group_backend: GroupBackend::Ldap,
            ldapsearch_command: DEFAULT_LDAPSEARCH_COMMAND.to_string(),
            ldap_timeout: DEFAULT_QUERY_TIMEOUT,
            group_cache: CacheConfig::default(),
            group_file: PathBuf::from(DEFAULT_GROUP_FILE),
            passwd_file: PathBuf::from(DEFAULT_PASSWD_FILE),
            roles_file: None,
            database_url: None,
        }
    }
}

impl AuthnzConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            application: get("AUTHNZ_APPLICATION").unwrap_or(defaults.application),
            user_header: get("AUTHNZ_USER_HEADER").unwrap_or(defaults.user_header),
            redirect_url: get("AUTHNZ_REDIRECT_URL"),
            session_cookie: get("AUTHNZ_SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            session_ttl: seconds_or(get("AUTHNZ_SESSION_TTL"), "AUTHNZ_SESSION_TTL", defaults.session_ttl)?,
            secure_cookie: parse_or(get("AUTHNZ_SECURE_COOKIE"), "AUTHNZ_SECURE_COOKIE", defaults.secure_cookie)?,
            group_backend: match get("AUTHNZ_GROUP_BACKEND") {
                Some(raw) => raw.parse()?,
                None => defaults.group_backend,
            },
            ldapsearch_command: get("AUTHNZ_LDAPSEARCH_COMMAND").unwrap_or(defaults.ldapsearch_command),
            ldap_timeout: seconds_or(get("AUTHNZ_LDAP_TIMEOUT"), "AUTHNZ_LDAP_TIMEOUT", defaults.ldap_timeout)?,
            group_cache: CacheConfig {
                capacity: parse_or(
                    get("AUTHNZ_GROUP_CACHE_SIZE"),
                    "AUTHNZ_GROUP_CACHE_SIZE",
                    defaults.group_cache.capacity,
                )?,
                ttl: seconds_or(
                    get("AUTHNZ_GROUP_CACHE_TTL"),
                    "AUTHNZ_GROUP_CACHE_TTL",
                    defaults.group_cache.ttl,
                )?,
            },
            group_file: get("AUTHNZ_GROUP_FILE").map(PathBuf::from).unwrap_or(defaults.group_file),
            passwd_file: get("AUTHNZ_PASSWD_FILE").map(PathBuf::from).unwrap_or(defaults.passwd_file),
            roles_file: get("AUTHNZ_ROLES_FILE").map(PathBuf::from),
            database_url: get("DATABASE_URL"),
        })
    }

    /// Group resolver for the configured backend, behind the membership cache
    pub fn group_resolver(&self) -> Result<Arc<dyn GroupResolver>> {
        let backend: Arc<dyn GroupResolver> = match self.group_backend {
            GroupBackend::Ldap => {
                let client = LdapSearchClient::from_command_line(&self.ldapsearch_command, self.ldap_timeout)?;
                Arc::new(DirectoryGroupResolver::new(Arc::new(client)))
            }
            GroupBackend::Local => Arc::new(LocalGroupResolver::with_files(
                self.group_file.clone(),
                self.passwd_file.clone(),
            )),
        };

        Ok(Arc::new(CachedGroupResolver::new(backend, self.group_cache.clone())))
    }

    /// Settings for the request guards
    pub fn guard_settings(&self) -> GuardSettings {
        GuardSettings {
            user_header: self.user_header.clone(),
            redirect_url: self.redirect_url.clone(),
            session_cookie: self.session_cookie.clone(),
            secure_cookie: self.secure_cookie,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| AuthnzError::Config(format!("{}='{}': {}", key, value, e))),
        None => Ok(default),
    }
}

fn seconds_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let default_secs = default.as_secs();
    parse_or(raw, key, default_secs).map(Duration::from_secs)
}
