//! Directory session built on `ldap3`.
//!
//! [`Directory`] owns exactly one live connection plus the state the interpreter needs around
//! it: server metadata, the current search base and the bound identity. All protocol work goes
//! through the [`LdapConnector`] / [`LdapSession`] seam so the session logic can run against
//! mocks.

use crate::{
    config::DirectoryConfig,
    dn::DistinguishedName,
    error::{ElevateError, Error, RC_SIZE_LIMIT_EXCEEDED, RC_SUCCESS, RC_TIME_LIMIT_EXCEEDED},
    server_info::{ServerMetadata, ROOT_DSE_ATTRIBUTES},
    Result,
};
use async_trait::async_trait;
use ldap3::{
    exop::WhoAmI, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope, SearchEntry,
    SearchResult,
};
use native_tls::{Certificate, TlsConnector};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Object class used when the operator leaves the prompt empty.
pub const DEFAULT_OBJECT_CLASS: &str = "*";
/// Attribute selector used when the operator leaves the prompt empty.
pub const DEFAULT_ATTRIBUTES: &str = "*";

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    #[default]
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

impl FromStr for SearchScope {
    type Err = Error;

    /// Parses `BASE`, `ONELEVEL` or `SUBTREE` (case-insensitive); empty input means `SUBTREE`.
    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_uppercase().as_str() {
            "" | "SUBTREE" | "SUB" => Ok(Self::Subtree),
            "BASE" => Ok(Self::Base),
            "ONELEVEL" | "LEVEL" | "ONE" => Ok(Self::OneLevel),
            other => Err(Error::InvalidRequest(format!(
                "unknown search scope `{other}` (expected BASE, ONELEVEL or SUBTREE)"
            ))),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "BASE",
            Self::OneLevel => "ONELEVEL",
            Self::Subtree => "SUBTREE",
        })
    }
}

/// A fully specified search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Breadth of the search.
    pub scope: SearchScope,
    /// LDAP filter string.
    pub filter: String,
    /// Requested attributes.
    pub attributes: Vec<String>,
}

impl SearchRequest {
    /// Builds a search from raw prompt input.
    ///
    /// Empty `object_class`, `scope` and `attributes` fall back to `*`, `SUBTREE` and `*`. The
    /// filter is `(&(objectClass=<object_class>))`; attributes are split on commas and
    /// whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an unknown scope.
    pub fn from_input(
        base: &str,
        object_class: &str,
        scope: &str,
        attributes: &str,
    ) -> Result<Self> {
        let object_class = non_empty_or(object_class, DEFAULT_OBJECT_CLASS);
        let attributes = non_empty_or(attributes, DEFAULT_ATTRIBUTES);

        Ok(Self {
            base: base.to_string(),
            scope: scope.parse()?,
            filter: format!("(&(objectClass={object_class}))"),
            attributes: attributes
                .split(|ch: char| ch == ',' || ch.is_whitespace())
                .filter(|attr| !attr.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Search that reads the root DSE.
    #[must_use]
    pub fn root_dse() -> Self {
        Self {
            base: String::new(),
            scope: SearchScope::Base,
            filter: "(objectClass=*)".to_string(),
            attributes: ROOT_DSE_ATTRIBUTES.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// LDAP entry representation used by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values preserved order from server).
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes whose values are not valid UTF-8.
    pub binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl From<SearchEntry> for LdapEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            binary_attributes: entry.bin_attrs,
        }
    }
}

impl fmt::Display for LdapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DN: {}", self.dn)?;

        let mut names: Vec<&String> = self
            .attributes
            .keys()
            .chain(self.binary_attributes.keys())
            .collect();
        names.sort_unstable_by_key(|name| name.to_ascii_lowercase());

        for name in names {
            if let Some(values) = self.attributes.get(name) {
                for value in values {
                    writeln!(f, "    {name}: {value}")?;
                }
            }
            if let Some(values) = self.binary_attributes.get(name) {
                for value in values {
                    writeln!(f, "    {name}: <binary, {} bytes>", value.len())?;
                }
            }
        }
        Ok(())
    }
}

/// Replace-mode attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceAttribute {
    /// Attribute to modify.
    pub attribute: String,
    /// Replacement values.
    pub values: Vec<String>,
}

impl ReplaceAttribute {
    /// Replaces all values of `attribute` with exactly `value`.
    #[must_use]
    pub fn single(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }
}

/// One open LDAP connection.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait LdapSession: Send {
    /// Simple bind; empty DN and password bind anonymously.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    /// Runs a search and returns the entries in server order.
    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<LdapEntry>>;
    /// Applies replace modifications to the entry at `dn`.
    async fn modify(&mut self, dn: &str, modifications: &[ReplaceAttribute]) -> Result<()>;
    /// "Who am I?" extended operation; returns the raw authzid.
    async fn who_am_i(&mut self) -> Result<String>;
    /// Closes the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens new LDAP connections.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait LdapConnector: Send + Sync {
    /// Opens an unbound connection.
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Live directory session: one connection, its metadata, search base and bound identity.
pub struct Directory {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn LdapConnector>,
    session: Box<dyn LdapSession>,
    metadata: ServerMetadata,
    naming_context: String,
    search_base: String,
    identity: Option<String>,
}

impl Directory {
    /// Connects to the configured server, binds anonymously and reads the root DSE.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] when the server is unreachable or refuses the anonymous bind
    /// and [`Error::Parse`] when no default naming context can be derived.
    pub async fn connect(config: DirectoryConfig) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let connector = Box::new(RealLdapConnector::new(config.clone()));
        Self::establish(config, connector).await
    }

    /// Same as [`Directory::connect`] with a caller-provided connector.
    ///
    /// # Errors
    ///
    /// See [`Directory::connect`].
    pub async fn connect_with(
        config: DirectoryConfig,
        connector: Box<dyn LdapConnector>,
    ) -> Result<Self> {
        config.check()?;
        Self::establish(Arc::new(config), connector).await
    }

    async fn establish(
        config: Arc<DirectoryConfig>,
        connector: Box<dyn LdapConnector>,
    ) -> Result<Self> {
        let mut session = open_anonymous(&*connector, &config).await?;
        let metadata = fetch_server_info(&mut *session, config.operation_timeout()).await?;

        let naming_context = match config.search_base() {
            Some(base) => {
                DistinguishedName::parse(base)?;
                base.trim().to_string()
            }
            None => metadata.default_naming_context()?,
        };

        info!(
            url = %config.url(),
            naming_context = %naming_context,
            "connected anonymously"
        );

        Ok(Self {
            config,
            connector,
            session,
            metadata,
            search_base: naming_context.clone(),
            naming_context,
            identity: None,
        })
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Root DSE snapshot taken at connect time.
    #[must_use]
    pub const fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    /// Naming context derived at connect time.
    #[must_use]
    pub fn naming_context(&self) -> &str {
        &self.naming_context
    }

    /// Current search base.
    #[must_use]
    pub fn search_base(&self) -> &str {
        &self.search_base
    }

    /// Bound identity, `None` while anonymous.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Replaces the search base. The DN is checked for syntax only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty or malformed DN; the base is unchanged.
    pub fn set_search_base(&mut self, base: &str) -> Result<()> {
        DistinguishedName::parse(base)?;
        self.search_base = base.trim().to_string();
        debug!(search_base = %self.search_base, "search base changed");
        Ok(())
    }

    /// Binds a fresh connection as `bind_dn` and, on success, makes it the live connection.
    ///
    /// The live connection is left untouched when elevation fails; callers decide whether to
    /// fall back with [`Directory::reset_to_anonymous`].
    ///
    /// # Errors
    ///
    /// Returns an [`ElevateError`] naming why the bind or the identity lookup failed.
    pub async fn elevate(
        &mut self,
        bind_dn: &DistinguishedName,
        password: &SecretString,
    ) -> std::result::Result<String, ElevateError> {
        let limit = self.config.operation_timeout();
        let mut session = with_timeout(
            self.config.connection_timeout(),
            "connect",
            self.connector.connect(),
        )
        .await
        .map_err(ElevateError::Transport)?;

        match authenticate(&mut *session, bind_dn.as_str(), password.expose_secret(), limit).await {
            Ok(identity) => {
                let mut previous = std::mem::replace(&mut self.session, session);
                close_session(&mut *previous, limit).await;
                info!(identity = %identity, "connection elevated");
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(err) => {
                close_session(&mut *session, limit).await;
                warn!(bind_dn = %bind_dn, error = %err, "elevation failed");
                Err(err)
            }
        }
    }

    /// Drops the bound identity and returns the live connection to anonymous.
    ///
    /// Tries an anonymous rebind first and opens a fresh anonymous connection if that fails. A
    /// failed bind leaves an LDAP connection anonymous, so the identity is cleared either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] when neither the rebind nor a fresh connection succeeds.
    pub async fn reset_to_anonymous(&mut self) -> Result<()> {
        self.identity = None;
        let limit = self.config.operation_timeout();

        match with_timeout(limit, "bind", self.session.simple_bind("", "")).await {
            Ok(()) => {
                debug!("connection rebound anonymously");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "anonymous rebind failed, reconnecting");
                let session = open_anonymous(&*self.connector, &self.config).await?;
                let mut previous = std::mem::replace(&mut self.session, session);
                close_session(&mut *previous, limit).await;
                Ok(())
            }
        }
    }

    /// Server's authzid for the current bind (empty when anonymous).
    ///
    /// # Errors
    ///
    /// Returns the transport or server error from the extended operation.
    pub async fn who_am_i(&mut self) -> Result<String> {
        with_timeout(
            self.config.operation_timeout(),
            "who am i",
            self.session.who_am_i(),
        )
        .await
    }

    /// Runs `request` on the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] wrapping the server or transport failure.
    pub async fn search(&mut self, request: &SearchRequest) -> Result<Vec<LdapEntry>> {
        debug!(base = %request.base, scope = %request.scope, filter = %request.filter, "search");
        with_timeout(
            self.config.operation_timeout(),
            "search",
            self.session.search(request),
        )
        .await
        .map_err(Error::search)
    }

    /// Searches the current search base with raw prompt input (empty means default).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an unknown scope and [`Error::Search`] when the
    /// search itself fails.
    pub async fn query(
        &mut self,
        object_class: &str,
        scope: &str,
        attributes: &str,
    ) -> Result<Vec<LdapEntry>> {
        let request =
            SearchRequest::from_input(&self.search_base, object_class, scope, attributes)?;
        self.search(&request).await
    }

    /// Replaces `attribute` with exactly `value` on `<target_rdn>,<search base>`.
    ///
    /// A target that is already a DN under the search base is used as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Modify`] when the target is malformed or the server refuses.
    pub async fn modify(&mut self, target_rdn: &str, attribute: &str, value: &str) -> Result<()> {
        let attribute = attribute.trim();
        if attribute.is_empty() {
            return Err(Error::modify(Error::InvalidRequest(
                "attribute name cannot be empty".to_string(),
            )));
        }
        let target = modify_target(target_rdn, &self.search_base).map_err(Error::modify)?;

        debug!(target = %target, attribute, "modify (replace)");
        with_timeout(
            self.config.operation_timeout(),
            "modify",
            self.session
                .modify(&target, &[ReplaceAttribute::single(attribute, value)]),
        )
        .await
        .map_err(Error::modify)
    }

    /// Replace-modifies the entry of the bound identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Modify`] without contacting the server while anonymous.
    pub async fn modify_bound_entry(&mut self, attribute: &str, value: &str) -> Result<()> {
        let Some(identity) = self.identity.clone() else {
            return Err(Error::modify(Error::InvalidRequest(
                "no bound identity, the connection is anonymous".to_string(),
            )));
        };
        self.modify(&identity, attribute, value).await
    }

    /// Unbinds the live connection.
    pub async fn close(mut self) {
        let limit = self.config.operation_timeout();
        close_session(&mut *self.session, limit).await;
    }
}

/// Reads the root DSE of the server behind `session`.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the server refuses to expose its root DSE and the transport
/// error otherwise.
pub async fn fetch_server_info(
    session: &mut dyn LdapSession,
    limit: Duration,
) -> Result<ServerMetadata> {
    let request = SearchRequest::root_dse();
    let entries = with_timeout(limit, "root DSE search", session.search(&request))
        .await
        .map_err(|err| match err {
            Error::Rejected { .. } => Error::Parse(format!("root DSE unreadable: {err}")),
            other => other,
        })?;

    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("server returned no root DSE".to_string()))?;
    Ok(ServerMetadata::new(entry.attributes))
}

fn modify_target(target: &str, base: &str) -> Result<String> {
    let target = DistinguishedName::parse(target)?;
    let base = DistinguishedName::parse(base)?;
    if target.ends_with(&base) {
        Ok(target.to_string())
    } else {
        Ok(target.join(&base).to_string())
    }
}

fn parse_identity(authzid: &str) -> std::result::Result<String, ElevateError> {
    match authzid.split_once(':') {
        Some((_, identity)) if !identity.trim().is_empty() => Ok(identity.to_string()),
        _ => Err(ElevateError::MalformedIdentity(authzid.to_string())),
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() {
        default
    } else {
        value
    }
}

async fn authenticate(
    session: &mut dyn LdapSession,
    bind_dn: &str,
    password: &str,
    limit: Duration,
) -> std::result::Result<String, ElevateError> {
    with_timeout(limit, "bind", session.simple_bind(bind_dn, password))
        .await
        .map_err(|err| ElevateError::from_bind(bind_dn, err))?;
    let authzid = with_timeout(limit, "who am i", session.who_am_i())
        .await
        .map_err(|err| ElevateError::from_bind(bind_dn, err))?;
    parse_identity(&authzid)
}

async fn open_anonymous(
    connector: &dyn LdapConnector,
    config: &DirectoryConfig,
) -> Result<Box<dyn LdapSession>> {
    let mut session = with_timeout(config.connection_timeout(), "connect", connector.connect())
        .await
        .map_err(|err| match err {
            Error::Connect(_) => err,
            other => Error::Connect(other.to_string()),
        })?;

    if let Err(err) = with_timeout(
        config.operation_timeout(),
        "anonymous bind",
        session.simple_bind("", ""),
    )
    .await
    {
        close_session(&mut *session, config.operation_timeout()).await;
        return Err(match err {
            Error::Rejected { message, code, .. } => {
                Error::Connect(format!("anonymous bind rejected (rc={code}): {message}"))
            }
            Error::Connect(_) => err,
            other => Error::Connect(other.to_string()),
        });
    }
    Ok(session)
}

async fn close_session(session: &mut dyn LdapSession, limit: Duration) {
    if let Err(err) = with_timeout(limit, "unbind", session.unbind()).await {
        debug!(error = %err, "unbind failed");
    }
}

async fn with_timeout<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{operation} exceeded {}s", limit.as_secs())))?
}

/// Real LDAP connector backed by `ldap3`.
pub struct RealLdapConnector {
    config: Arc<DirectoryConfig>,
}

impl RealLdapConnector {
    /// Creates a new connector instance.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config)?;
        let url = self.config.url();
        debug!(url = %url, "opening connection");
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|err| Error::Connect(format!("{url}: {err}")))?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession { inner: ldap }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let result = self
            .inner
            .simple_bind(dn, password)
            .await
            .map_err(transport_error)?;
        result.success().map_err(|err| ldap_error("bind", err))?;
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<LdapEntry>> {
        let SearchResult(entries, result) = self
            .inner
            .search(
                &request.base,
                request.scope.into(),
                &request.filter,
                request.attributes.clone(),
            )
            .await
            .map_err(transport_error)?;
        if search_truncated(result)? {
            warn!(
                base = %request.base,
                returned = entries.len(),
                "server limit reached, search results are partial"
            );
        }
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(LdapEntry::from)
            .collect())
    }

    async fn modify(&mut self, dn: &str, modifications: &[ReplaceAttribute]) -> Result<()> {
        let mods = modifications
            .iter()
            .map(|m| {
                Mod::Replace(
                    m.attribute.clone(),
                    m.values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();

        let result = self.inner.modify(dn, mods).await.map_err(transport_error)?;
        result.success().map_err(|err| ldap_error("modify", err))?;
        Ok(())
    }

    async fn who_am_i(&mut self) -> Result<String> {
        let result = self.inner.extended(WhoAmI).await.map_err(transport_error)?;
        let (exop, _) = result.success().map_err(|err| ldap_error("who am i", err))?;
        Ok(exop
            .val
            .as_deref()
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.inner.unbind().await.map_err(transport_error)
    }
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| Error::Config(format!("failed to construct TLS connector: {err}")))?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::Config(format!(
                "failed to read CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| Error::Config(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::Config(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

/// Accepts a completed search; size and time limits still deliver the entries sent so far.
fn search_truncated(result: LdapResult) -> Result<bool> {
    match result.rc {
        RC_SUCCESS => Ok(false),
        RC_SIZE_LIMIT_EXCEEDED | RC_TIME_LIMIT_EXCEEDED => Ok(true),
        _ => Err(ldap_error("search", LdapError::LdapResult { result })),
    }
}

fn ldap_error(operation: &'static str, err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => Error::Rejected {
            operation,
            code: result.rc,
            message: result.text,
        },
        other => transport_error(other),
    }
}

fn transport_error(err: LdapError) -> Error {
    match err {
        LdapError::Timeout { .. } => Error::Timeout(err.to_string()),
        LdapError::FilterParsing { .. } => Error::InvalidRequest(err.to_string()),
        other => Error::Connect(other.to_string()),
    }
}
