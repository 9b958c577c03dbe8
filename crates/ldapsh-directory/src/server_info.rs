//! Root DSE snapshot and naming context derivation.

use crate::{error::Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Root DSE attribute holding the default naming context.
pub const DEFAULT_NAMING_CONTEXT_ATTRIBUTE: &str = "defaultNamingContext";

/// Attributes requested when reading the root DSE: all user and operational attributes.
pub(crate) const ROOT_DSE_ATTRIBUTES: &[&str] = &["*", "+"];

/// Read-only snapshot of the attributes a server advertises in its root DSE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMetadata {
    attributes: BTreeMap<String, Vec<String>>,
}

impl ServerMetadata {
    /// Wraps the attributes of a root DSE entry.
    #[must_use]
    pub fn new(attributes: HashMap<String, Vec<String>>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
        }
    }

    fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Derives the initial search base from `defaultNamingContext`.
    ///
    /// The first value is taken and any enclosing `[`, `]` or `'` characters are stripped, so a
    /// value rendered as a list (`['dc=example,dc=com']`) yields `dc=example,dc=com`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the attribute is absent or normalizes to an empty string.
    pub fn default_naming_context(&self) -> Result<String> {
        let raw = self
            .values(DEFAULT_NAMING_CONTEXT_ATTRIBUTE)
            .and_then(|values| values.first())
            .ok_or_else(|| {
                Error::Parse(format!(
                    "server did not advertise `{DEFAULT_NAMING_CONTEXT_ATTRIBUTE}`"
                ))
            })?;

        let normalized = normalize_naming_context(raw);
        if normalized.is_empty() {
            return Err(Error::Parse(format!(
                "`{DEFAULT_NAMING_CONTEXT_ATTRIBUTE}` is empty"
            )));
        }
        Ok(normalized.to_string())
    }
}

impl fmt::Display for ServerMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DSA info (from DSE):")?;
        if self.attributes.is_empty() {
            return writeln!(f, "  <no attributes advertised>");
        }
        for (name, values) in &self.attributes {
            writeln!(f, "  {name}:")?;
            for value in values {
                writeln!(f, "    {value}")?;
            }
        }
        Ok(())
    }
}

fn normalize_naming_context(raw: &str) -> &str {
    raw.trim().trim_matches(|ch: char| matches!(ch, '[' | ']' | '\'')).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &[&str])]) -> ServerMetadata {
        ServerMetadata::new(
            pairs
                .iter()
                .map(|(name, values)| {
                    (
                        (*name).to_string(),
                        values.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn default_naming_context_plain() {
        let info = metadata(&[("defaultNamingContext", &["dc=example,dc=com"])]);
        assert_eq!(info.default_naming_context().unwrap(), "dc=example,dc=com");
    }

    #[test]
    fn default_naming_context_strips_list_artifacts() {
        let info = metadata(&[("defaultnamingcontext", &["['DC=corp,DC=local']"])]);
        assert_eq!(info.default_naming_context().unwrap(), "DC=corp,DC=local");
    }

    #[test]
    fn missing_default_naming_context_is_parse_error() {
        let info = metadata(&[("namingContexts", &["dc=example,dc=com"])]);
        assert!(matches!(info.default_naming_context(), Err(Error::Parse(_))));

        let info = metadata(&[("defaultNamingContext", &["[]"])]);
        assert!(matches!(info.default_naming_context(), Err(Error::Parse(_))));
    }

    #[test]
    fn display_lists_every_value() {
        let info = metadata(&[
            ("namingContexts", &["dc=example,dc=com", "cn=config"]),
            ("supportedLDAPVersion", &["3"]),
        ]);

        let rendered = info.to_string();
        assert!(rendered.starts_with("DSA info (from DSE):\n"));
        assert!(rendered.contains("  namingContexts:\n    dc=example,dc=com\n    cn=config\n"));
        assert!(ServerMetadata::default().to_string().contains("no attributes"));
    }
}
