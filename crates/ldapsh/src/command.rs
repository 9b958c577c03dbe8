//! Command vocabulary of the interactive shell.

use secrecy::SecretString;

/// Text printed by `usage` and at startup.
pub const USAGE: &str = "
ldapsh
-------------------------------------------------------------
Usage:
info     - get server information
cs       - change the search base for queries
elevate  - elevate the connection to an authorized connection
modify   - modify user data (elevated connection necessary)
whoami   - get current user information
query    - query the directory
exit     - leave the shell (also: quit, q)
-------------------------------------------------------------
";

/// First word of an input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// `usage`
    Usage,
    /// `info`
    Info,
    /// `cs`
    ChangeBase,
    /// `elevate`
    Elevate,
    /// `modify`
    Modify,
    /// `whoami`
    WhoAmI,
    /// `query`
    Query,
    /// `exit`, `quit` or `q`
    Exit,
    /// Anything else, kept verbatim for the error message.
    Unrecognized(String),
}

impl Verb {
    /// Parses a trimmed input line. Returns `None` for a blank line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let verb = match line {
            "" => return None,
            "usage" => Self::Usage,
            "info" => Self::Info,
            "cs" => Self::ChangeBase,
            "elevate" => Self::Elevate,
            "modify" => Self::Modify,
            "whoami" => Self::WhoAmI,
            "query" => Self::Query,
            "exit" | "quit" | "q" => Self::Exit,
            other => Self::Unrecognized(other.to_string()),
        };
        Some(verb)
    }
}

/// A verb together with every parameter it needs, ready to execute.
#[derive(Debug)]
pub enum Command {
    /// Print the command list.
    Usage,
    /// Print server metadata.
    Info,
    /// Replace the search base.
    ChangeBase {
        /// New naming context.
        base: String,
    },
    /// Bind as `uid=<uid>,ou=<ou>,<naming context>`.
    Elevate {
        /// User id.
        uid: String,
        /// Organizational unit.
        ou: String,
        /// Bind password.
        password: SecretString,
    },
    /// Replace one attribute of the bound entry.
    Modify {
        /// Attribute name.
        attribute: String,
        /// New value.
        value: String,
    },
    /// Print the server's view of the current bind.
    WhoAmI,
    /// Search the current search base. Empty fields mean "use the default".
    Query {
        /// Object class for the filter.
        object_class: String,
        /// `BASE`, `ONELEVEL` or `SUBTREE`.
        scope: String,
        /// Attribute list.
        attributes: String,
    },
    /// Leave the loop.
    Exit,
    /// Unknown input.
    Unrecognized(String),
}
