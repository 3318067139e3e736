//! Error types for the privilege resolution engine

use thiserror::Error;

/// Errors raised by the engine and its collaborators
#[derive(Debug, Error)]
pub enum AuthnzError {
    /// A privilege that no role of the application declares.
    /// Always a caller bug; never turned into a silent deny.
    #[error("Unknown privilege '{privilege}' for application '{application}'; expected one of: {known}")]
    UnknownPrivilege {
        application: String,
        privilege: String,
        known: String,
    },

    /// The privilege map could not be loaded at startup
    #[error("Failed to initialize application '{application}': {reason}")]
    Initialization { application: String, reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Role backing store failure
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Group membership could not be determined
    #[error(transparent)]
    GroupResolution(#[from] GroupResolutionError),

    /// Session store failure
    #[error("Session error: {0}")]
    Session(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthnzError {
    /// True for the configuration class of errors (unknown privilege,
    /// failed initialization, bad settings)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownPrivilege { .. } | Self::Initialization { .. } | Self::Config(_)
        )
    }
}

/// Failure to resolve group membership.
///
/// Distinct from an empty group set: callers decide what a failure means.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupResolutionError {
    /// The directory or account source could not be queried
    #[error("Group source unavailable: {0}")]
    Unavailable(String),

    /// The directory query did not finish in time
    #[error("Group query timed out after {0} ms")]
    Timeout(u64),

    /// The response could not be understood
    #[error("Malformed group response: {0}")]
    Malformed(String),

    /// The user is not known to the account source
    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, AuthnzError>;

/// Result type for group resolution
pub type GroupResult<T> = std::result::Result<T, GroupResolutionError>;
