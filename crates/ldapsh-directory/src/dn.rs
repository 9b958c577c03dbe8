//! Distinguished name parsing and composition.
//!
//! Used to build bind DNs from prompted input and to compose modify targets from an identity
//! and the current search base.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::Error as DirectoryError;

/// Errors that can occur when parsing or manipulating distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for DirectoryError {
    fn from(err: DistinguishedNameError) -> Self {
        DirectoryError::InvalidRequest(err.to_string())
    }
}

/// Relative distinguished name (single attribute/value pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Create a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion of the RDN (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Attribute value portion of the RDN.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN matches the provided attribute name (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Parsed distinguished name.
///
/// Keeps the text it was parsed from next to the unescaped RDN sets, so a DN reported by the
/// server is sent back exactly as received. Comparisons work on the unescaped values and ignore
/// case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name from a string.
    ///
    /// Both `\<char>` and `\<hex><hex>` escapes are understood.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the distinguished name is empty or contains invalid
    /// syntax.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let raw = trim_escaped(input.as_ref());
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut rdns = Vec::new();
        for component in split_escaped(raw, ',')? {
            let mut rdn_components = Vec::new();
            for part in split_escaped(component, '+')? {
                let (attribute, value) = split_attribute_value(part)?;
                rdn_components.push(RelativeDistinguishedName::new(attribute, value));
            }
            rdns.push(rdn_components);
        }

        Ok(Self {
            raw: raw.to_string(),
            rdns,
        })
    }

    /// Borrows the distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if `suffix` names this entry or one of its ancestors.
    ///
    /// Attribute names and values are compared case-insensitively.
    #[must_use]
    pub fn ends_with(&self, suffix: &DistinguishedName) -> bool {
        if suffix.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - suffix.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&suffix.rdns)
            .all(|(ours, theirs)| rdn_set_matches(ours, theirs))
    }

    /// Creates a new distinguished name by prefixing the provided RDN.
    #[must_use]
    pub fn with_prefix(mut self, rdn: RelativeDistinguishedName) -> Self {
        self.raw = format!("{}={},{}", rdn.attribute(), escape(rdn.value()), self.raw);
        self.rdns.insert(0, vec![rdn]);
        self
    }

    /// Creates a new distinguished name by appending another distinguished name.
    #[must_use]
    pub fn join(mut self, suffix: &DistinguishedName) -> Self {
        self.raw = format!("{},{}", self.raw, suffix.raw);
        self.rdns.extend(suffix.rdns.iter().cloned());
        self
    }
}

/// Builds the bind DN `uid=<uid>,ou=<ou>,<naming_context>`.
///
/// `uid` and `ou` are taken literally and escaped, so a comma typed at the prompt cannot add
/// extra RDNs.
///
/// # Errors
///
/// Returns [`DistinguishedNameError`] if `uid` or `ou` is empty or the naming context does not
/// parse.
pub fn build_bind_dn(
    uid: &str,
    ou: &str,
    naming_context: &str,
) -> std::result::Result<DistinguishedName, DistinguishedNameError> {
    let uid = uid.trim();
    let ou = ou.trim();
    if uid.is_empty() {
        return Err(DistinguishedNameError::MissingValue("uid".to_string()));
    }
    if ou.is_empty() {
        return Err(DistinguishedNameError::MissingValue("ou".to_string()));
    }

    Ok(DistinguishedName::parse(naming_context)?
        .with_prefix(RelativeDistinguishedName::new("ou", ou))
        .with_prefix(RelativeDistinguishedName::new("uid", uid)))
}

fn rdn_set_matches(
    ours: &[RelativeDistinguishedName],
    theirs: &[RelativeDistinguishedName],
) -> bool {
    ours.len() == theirs.len()
        && ours.iter().all(|rdn| {
            theirs.iter().any(|other| {
                rdn.matches_attribute(other.attribute())
                    && rdn.value().eq_ignore_ascii_case(other.value())
            })
        })
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Trims surrounding whitespace, keeping a trailing space that is escaped.
fn trim_escaped(input: &str) -> &str {
    let start = input.len() - input.trim_start().len();
    let mut end = start + input.trim().len();

    let trailing_backslashes = input[start..end]
        .chars()
        .rev()
        .take_while(|ch| *ch == '\\')
        .count();
    if trailing_backslashes % 2 == 1 {
        if let Some(ch) = input[end..].chars().next() {
            end += ch.len_utf8();
        }
    }
    &input[start..end]
}

/// Splits on unescaped `delimiter`. Escapes are left in place for the next stage.
fn split_escaped(
    input: &str,
    delimiter: char,
) -> std::result::Result<Vec<&str>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escape = false;

    for (i, ch) in input.char_indices() {
        if escape {
            escape = false;
        } else if ch == '\\' {
            escape = true;
        } else if ch == delimiter {
            parts.push(trim_escaped(&input[start..i]));
            start = i + ch.len_utf8();
        }
    }

    if escape {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }

    parts.push(trim_escaped(&input[start..]));
    if parts.iter().any(|part| part.is_empty()) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn split_attribute_value(
    component: &str,
) -> std::result::Result<(String, String), DistinguishedNameError> {
    let mut escape = false;
    let mut index = None;

    for (i, ch) in component.char_indices() {
        if escape {
            escape = false;
            continue;
        }

        if ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '=' {
            index = Some(i);
            break;
        }
    }

    let idx =
        index.ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;
    let attribute = component[..idx].trim();
    let value_part = trim_escaped(&component[idx + 1..]);

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            component.to_string(),
        ));
    }

    if value_part.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    Ok((attribute.to_string(), unescape(value_part)?))
}

fn unescape(value: &str) -> std::result::Result<String, DistinguishedNameError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('\\') {
        bytes.extend_from_slice(rest[..pos].as_bytes());
        let escaped = &rest[pos + 1..];
        let first = escaped
            .chars()
            .next()
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;

        if let Some(byte) = hex_pair(escaped) {
            bytes.push(byte);
            rest = &escaped[2..];
        } else {
            let mut buf = [0; 4];
            bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
            rest = &escaped[first.len_utf8()..];
        }
    }
    bytes.extend_from_slice(rest.as_bytes());

    String::from_utf8(bytes)
        .map_err(|_| DistinguishedNameError::InvalidComponent(value.to_string()))
}

fn hex_pair(input: &str) -> Option<u8> {
    let pair = input.get(..2)?;
    if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(pair, 16).ok()
}

fn escape(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = value.chars().collect();
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in chars.iter().enumerate() {
        let is_first = idx == 0;
        let is_last = idx == chars.len() - 1;
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (is_first && (*ch == ' ' || *ch == '#'))
            || (is_last && *ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(*ch);
    }

    escaped
}
