//! Directory session layer for `ldapsh`.
//!
//! This crate owns the single LDAP connection an interactive session works with: anonymous
//! connect, root DSE inspection, elevation to an authenticated identity, searches and
//! replace-mode modifications. Protocol work is delegated to `ldap3`.

#![deny(missing_docs)]

mod client;
mod config;
mod dn;
mod error;
mod server_info;

pub use client::{
    fetch_server_info, Directory, LdapConnector, LdapEntry, LdapSession, RealLdapConnector,
    ReplaceAttribute, SearchRequest, SearchScope, DEFAULT_ATTRIBUTES, DEFAULT_OBJECT_CLASS,
};
#[cfg(feature = "mock")]
pub use client::{MockLdapConnector, MockLdapSession};
pub use config::{
    DirectoryConfig, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_LDAP_PORT,
    DEFAULT_OPERATION_TIMEOUT_SECS,
};
pub use dn::{build_bind_dn, DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use error::{ElevateError, Error, Result, RC_INVALID_CREDENTIALS};
pub use server_info::{ServerMetadata, DEFAULT_NAMING_CONTEXT_ATTRIBUTE};
