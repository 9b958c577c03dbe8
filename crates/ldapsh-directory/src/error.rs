//! Error types for directory operations.
//!
//! [`Error`] covers every failure a directory round trip can produce. Elevation has its own
//! [`ElevateError`] so callers can tell a bad password apart from a broken transport.

use thiserror::Error;

/// LDAP result code for `success`.
pub const RC_SUCCESS: u32 = 0;
/// LDAP result code for `timeLimitExceeded`.
pub const RC_TIME_LIMIT_EXCEEDED: u32 = 3;
/// LDAP result code for `sizeLimitExceeded`.
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code for `invalidCredentials`.
pub const RC_INVALID_CREDENTIALS: u32 = 49;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport-level failure or rejected anonymous bind
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server answered with a non-success result code
    #[error("Server rejected {operation} (rc={code}): {message}")]
    Rejected {
        /// Operation that was rejected
        operation: &'static str,
        /// LDAP result code
        code: u32,
        /// Diagnostic text returned by the server
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Server metadata could not be interpreted
    #[error("Failed to parse server metadata: {0}")]
    Parse(String),

    /// Search failed
    #[error("Search failed: {0}")]
    Search(#[source] Box<Error>),

    /// Modify failed
    #[error("Modify failed: {0}")]
    Modify(#[source] Box<Error>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT_ERROR",
            Self::Rejected { .. } => "REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Search(_) => "SEARCH_ERROR",
            Self::Modify(_) => "MODIFY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) | Self::Config(_) => true,
            Self::Search(inner) | Self::Modify(inner) => inner.should_log(),
            _ => false,
        }
    }

    pub(crate) fn search(err: Self) -> Self {
        Self::Search(Box::new(err))
    }

    pub(crate) fn modify(err: Self) -> Self {
        Self::Modify(Box::new(err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid directory endpoint: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Reasons an elevation attempt can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElevateError {
    /// The server rejected the bind DN / password pair
    #[error("invalid credentials for {bind_dn}")]
    InvalidCredentials {
        /// DN the bind was attempted with
        bind_dn: String,
    },

    /// The server rejected the bind for a reason other than bad credentials
    #[error("bind refused: {0}")]
    Rejected(#[source] Error),

    /// The connection failed or timed out during elevation
    #[error("transport failure during elevation: {0}")]
    Transport(#[source] Error),

    /// The who-am-i response did not carry an identity
    #[error("malformed who-am-i response: {0:?}")]
    MalformedIdentity(String),
}

impl ElevateError {
    pub(crate) fn from_bind(bind_dn: &str, err: Error) -> Self {
        match err {
            Error::Rejected {
                code: RC_INVALID_CREDENTIALS,
                ..
            } => Self::InvalidCredentials {
                bind_dn: bind_dn.to_string(),
            },
            Error::Rejected { .. } => Self::Rejected(err),
            other => Self::Transport(other),
        }
    }
}
