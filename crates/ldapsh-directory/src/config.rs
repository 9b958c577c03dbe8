//! Connection configuration for a directory session.

use crate::{error::Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default LDAP port.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Immutable settings used to open directory connections.
///
/// Built once from the command line and shared by every connection the session opens,
/// including the extra connections made while elevating.
#[derive(Debug, Clone, Validate)]
pub struct DirectoryConfig {
    #[validate(length(min = 1, message = "host cannot be empty"))]
    host: String,
    #[validate(range(min = 1, message = "port must be between 1 and 65535"))]
    port: u16,
    use_tls: bool,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    search_base: Option<String>,
    #[validate(range(min = 1, max = 300))]
    connection_timeout_secs: u64,
    #[validate(range(min = 1, max = 3600))]
    operation_timeout_secs: u64,
}

impl DirectoryConfig {
    /// Creates a configuration for a plain LDAP connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or port are invalid or do not form a valid endpoint URL.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let config = Self {
            host: host.into().trim().to_string(),
            port,
            use_tls: false,
            tls_verify: true,
            tls_ca_cert: None,
            search_base: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        };
        config.validate()?;
        Url::parse(&config.url())?;
        Ok(config)
    }

    /// Returns the server host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns whether the connection uses LDAPS.
    #[must_use]
    pub const fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Returns the endpoint URL handed to the LDAP library.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Search base that replaces the server's default naming context, if any.
    #[must_use]
    pub fn search_base(&self) -> Option<&str> {
        self.search_base.as_deref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Enables or disables LDAPS.
    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Uses `base` as the initial search base instead of the server's default naming context.
    #[must_use]
    pub fn with_search_base(mut self, base: impl Into<String>) -> Self {
        self.search_base = Some(base.into());
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Re-validates the configuration after builder overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a field is out of range and [`Error::Config`] when the
    /// search base override is blank.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self
            .search_base
            .as_deref()
            .is_some_and(|base| base.trim().is_empty())
        {
            return Err(Error::Config("search base override cannot be empty".to_string()));
        }
        Ok(())
    }
}
