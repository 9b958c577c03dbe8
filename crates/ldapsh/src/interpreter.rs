//! Read-eval-print loop over the command vocabulary.
//!
//! Each line goes through three steps: [`Verb::parse`], [`Interpreter::collect`] (which prompts
//! for the verb's parameters) and [`Interpreter::execute`]. Execution never prompts, so it can be
//! driven directly with a prepared [`Command`].

use crate::command::{Command, Verb, USAGE};
use crate::prompt::LineSource;
use ldapsh_directory::{build_bind_dn, Directory, ElevateError, Error};
use secrecy::SecretString;
use std::io::{self, Write};
use tracing::{debug, warn};

const SEARCH_HINT: &str = "Search failed, do you have permissions?";

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next command.
    Continue,
    /// Leave the loop.
    Exit,
}

/// Interactive shell bound to one directory session.
pub struct Interpreter<W> {
    directory: Directory,
    out: W,
}

impl<W: Write> Interpreter<W> {
    /// Creates an interpreter printing to `out`.
    pub fn new(directory: Directory, out: W) -> Self {
        Self { directory, out }
    }

    /// The directory session.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Output written so far.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Gives the session back, e.g. to close it.
    pub fn into_directory(self) -> Directory {
        self.directory
    }

    /// Prints the usage text and the connection summary.
    ///
    /// # Errors
    ///
    /// Fails only if the output cannot be written.
    pub fn banner(&mut self) -> io::Result<()> {
        write!(self.out, "{USAGE}")?;
        writeln!(
            self.out,
            "Connected to {} with naming context {} as user {}.",
            self.directory.config().host(),
            self.directory.naming_context(),
            self.directory.identity().unwrap_or("anonymous"),
        )
    }

    /// Runs until `exit`, `quit`, `q` or end of input.
    ///
    /// # Errors
    ///
    /// Fails only on input or output errors; command failures are printed and the loop
    /// continues.
    pub async fn run(&mut self, input: &mut dyn LineSource) -> io::Result<()> {
        loop {
            let Some(line) = input.read_line("> ").await? else {
                debug!("end of input");
                break;
            };
            let Some(verb) = Verb::parse(&line) else {
                continue;
            };
            let Some(command) = self.collect(verb, input).await? else {
                debug!("end of input while collecting parameters");
                break;
            };
            if self.execute(command).await? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Prompts for the parameters `verb` needs.
    ///
    /// Returns `Ok(None)` if input ends before every parameter was read.
    ///
    /// # Errors
    ///
    /// Fails on input or output errors.
    pub async fn collect(
        &mut self,
        verb: Verb,
        input: &mut dyn LineSource,
    ) -> io::Result<Option<Command>> {
        let command = match verb {
            Verb::Usage => Command::Usage,
            Verb::Info => Command::Info,
            Verb::WhoAmI => Command::WhoAmI,
            Verb::Exit => Command::Exit,
            Verb::Unrecognized(line) => Command::Unrecognized(line),
            Verb::ChangeBase => {
                writeln!(self.out, "Changing the search base.")?;
                writeln!(self.out, "Current: {}", self.directory.search_base())?;
                self.out.flush()?;
                let Some(base) = input.read_line("New naming context: ").await? else {
                    return Ok(None);
                };
                Command::ChangeBase { base }
            }
            Verb::Elevate => {
                let Some(uid) = input.read_line("uid: ").await? else {
                    return Ok(None);
                };
                let Some(ou) = input.read_line("ou: ").await? else {
                    return Ok(None);
                };
                let Some(password) = input.read_secret("password: ").await? else {
                    return Ok(None);
                };
                Command::Elevate { uid, ou, password }
            }
            Verb::Modify => {
                let Some(attribute) = input.read_line("Key: ").await? else {
                    return Ok(None);
                };
                let Some(value) = input.read_line("Value: ").await? else {
                    return Ok(None);
                };
                Command::Modify { attribute, value }
            }
            Verb::Query => {
                let Some(object_class) = input.read_line("ObjectClass (Default: *): ").await?
                else {
                    return Ok(None);
                };
                let Some(scope) = input.read_line("Scope (Default: SUBTREE): ").await? else {
                    return Ok(None);
                };
                let Some(attributes) = input.read_line("Attributes (Default: *): ").await? else {
                    return Ok(None);
                };
                Command::Query {
                    object_class,
                    scope,
                    attributes,
                }
            }
        };
        Ok(Some(command))
    }

    /// Executes a fully collected command.
    ///
    /// # Errors
    ///
    /// Fails only if the output cannot be written.
    pub async fn execute(&mut self, command: Command) -> io::Result<Flow> {
        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::Usage => write!(self.out, "{USAGE}")?,
            Command::Info => write!(self.out, "{}", self.directory.metadata())?,
            Command::ChangeBase { base } => self.change_base(&base)?,
            Command::Elevate { uid, ou, password } => self.elevate(&uid, &ou, &password).await?,
            Command::Modify { attribute, value } => self.modify(&attribute, &value).await?,
            Command::WhoAmI => self.who_am_i().await?,
            Command::Query {
                object_class,
                scope,
                attributes,
            } => self.query(&object_class, &scope, &attributes).await?,
            Command::Unrecognized(line) => {
                writeln!(self.out, "unrecognized option: {line}")?;
                writeln!(self.out, "try: usage")?;
            }
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn change_base(&mut self, base: &str) -> io::Result<()> {
        match self.directory.set_search_base(base) {
            Ok(()) => writeln!(
                self.out,
                "Search base set to {}",
                self.directory.search_base()
            ),
            Err(err) => writeln!(
                self.out,
                "Keeping search base {}: {err}",
                self.directory.search_base()
            ),
        }
    }

    async fn elevate(&mut self, uid: &str, ou: &str, password: &SecretString) -> io::Result<()> {
        match build_bind_dn(uid, ou, self.directory.naming_context()) {
            Ok(bind_dn) => match self.directory.elevate(&bind_dn, password).await {
                Ok(identity) => {
                    writeln!(self.out, "Connection elevated!")?;
                    writeln!(self.out, "current user: {identity}")?;
                    return Ok(());
                }
                Err(ElevateError::InvalidCredentials { .. }) => {
                    writeln!(self.out, "Elevating connection failed, check credentials")?;
                }
                Err(err) => {
                    writeln!(self.out, "Elevating connection went wrong: {err}")?;
                }
            },
            Err(err) => writeln!(self.out, "Cannot build a bind DN: {err}")?,
        }

        if let Err(err) = self.directory.reset_to_anonymous().await {
            warn!(error = %err, "could not return to an anonymous connection");
            writeln!(self.out, "Could not return to an anonymous connection: {err}")?;
        }
        writeln!(self.out, "Continuing as anonymous.")
    }

    async fn modify(&mut self, attribute: &str, value: &str) -> io::Result<()> {
        match self.directory.modify_bound_entry(attribute, value).await {
            Ok(()) => writeln!(
                self.out,
                "{}: {} successfully modified!",
                self.directory.identity().unwrap_or_default(),
                attribute.trim()
            ),
            Err(err) => {
                log_failure(&err);
                writeln!(
                    self.out,
                    "Modifying {} went wrong. Is your connection elevated?",
                    attribute.trim()
                )?;
                writeln!(self.out, "  {err}")
            }
        }
    }

    async fn who_am_i(&mut self) -> io::Result<()> {
        match self.directory.who_am_i().await {
            Ok(authzid) if authzid.is_empty() => writeln!(self.out, "anonymous"),
            Ok(authzid) => writeln!(self.out, "{authzid}"),
            Err(err) => {
                log_failure(&err);
                writeln!(self.out, "whoami failed: {err}")
            }
        }
    }

    async fn query(&mut self, object_class: &str, scope: &str, attributes: &str) -> io::Result<()> {
        match self.directory.query(object_class, scope, attributes).await {
            Ok(entries) if entries.is_empty() => writeln!(self.out, "{SEARCH_HINT}"),
            Ok(entries) => {
                for entry in &entries {
                    writeln!(self.out, "{entry}")?;
                }
                writeln!(self.out, "{} entries", entries.len())
            }
            Err(err @ Error::InvalidRequest(_)) => writeln!(self.out, "Invalid query: {err}"),
            Err(Error::Search(inner)) if matches!(*inner, Error::InvalidRequest(_)) => {
                writeln!(self.out, "Invalid query: {inner}")
            }
            Err(err) => {
                log_failure(&err);
                writeln!(self.out, "{SEARCH_HINT}")?;
                writeln!(self.out, "  {err}")
            }
        }
    }
}

fn log_failure(err: &Error) {
    if err.should_log() {
        warn!(code = err.error_code(), error = %err, "directory operation failed");
    } else {
        debug!(code = err.error_code(), error = %err, "directory operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ldapsh_directory::{
        DirectoryConfig, LdapEntry, MockLdapConnector, MockLdapSession, ReplaceAttribute,
        SearchScope, RC_INVALID_CREDENTIALS,
    };
    use mockall::predicate::eq;
    use std::collections::{HashMap, VecDeque};

    const JDOE_DN: &str = "uid=jdoe,ou=People,dc=example,dc=com";

    /// Scripted input that records every prompt it was asked to show.
    struct Script {
        lines: VecDeque<String>,
        prompts: Vec<String>,
    }

    impl Script {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|line| (*line).to_string()).collect(),
                prompts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl LineSource for Script {
        async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
            self.prompts.push(prompt.to_string());
            Ok(self.lines.pop_front())
        }
    }

    fn entry(dn: &str) -> LdapEntry {
        let mut attributes = HashMap::new();
        attributes.insert("objectClass".to_string(), vec!["top".to_string()]);
        LdapEntry {
            dn: dn.to_string(),
            attributes,
            ..LdapEntry::default()
        }
    }

    fn rejected(operation: &'static str, code: u32) -> Error {
        Error::Rejected {
            operation,
            code,
            message: String::new(),
        }
    }

    /// Anonymous session serving a root DSE for `dc=example,dc=com`.
    fn anonymous_session() -> MockLdapSession {
        let mut session = MockLdapSession::new();
        session
            .expect_simple_bind()
            .with(eq(""), eq(""))
            .returning(|_, _| Ok(()));
        session
            .expect_search()
            .withf(|request| request.base.is_empty())
            .times(1)
            .returning(|_| {
                let mut root = entry("");
                root.attributes.insert(
                    "defaultNamingContext".to_string(),
                    vec!["dc=example,dc=com".to_string()],
                );
                Ok(vec![root])
            });
        session.expect_who_am_i().returning(|| Ok(String::new()));
        session.expect_unbind().returning(|| Ok(()));
        session
    }

    async fn interpreter_with(sessions: Vec<MockLdapSession>) -> Interpreter<Vec<u8>> {
        let mut connector = MockLdapConnector::new();
        let mut sequence = mockall::Sequence::new();
        for session in sessions {
            connector
                .expect_connect()
                .times(1)
                .in_sequence(&mut sequence)
                .return_once(move || Ok(Box::new(session)));
        }
        let config = DirectoryConfig::new("ldap.example.com", 389).unwrap();
        let directory = Directory::connect_with(config, Box::new(connector))
            .await
            .unwrap();
        Interpreter::new(directory, Vec::new())
    }

    fn printed(interpreter: &Interpreter<Vec<u8>>) -> String {
        String::from_utf8_lossy(interpreter.output()).into_owned()
    }

    #[tokio::test]
    async fn banner_reports_connection() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter.banner().unwrap();
        let output = printed(&interpreter);
        assert!(output.contains("elevate  - elevate the connection"));
        assert!(output.contains(
            "Connected to ldap.example.com with naming context dc=example,dc=com as user anonymous."
        ));
    }

    #[tokio::test]
    async fn unrecognized_input_changes_nothing() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        let mut script = Script::new(&["frobnicate", "exit"]);
        interpreter.run(&mut script).await.unwrap();

        let output = printed(&interpreter);
        assert!(output.contains("unrecognized option: frobnicate\ntry: usage\n"));
        assert_eq!(interpreter.directory().search_base(), "dc=example,dc=com");
        assert_eq!(interpreter.directory().identity(), None);
        assert_eq!(script.prompts, ["> ", "> "]);
    }

    #[tokio::test]
    async fn end_of_input_exits() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        let mut script = Script::new(&["", "   "]);
        interpreter.run(&mut script).await.unwrap();
        assert_eq!(script.prompts.len(), 3);
        assert!(printed(&interpreter).is_empty());
    }

    #[tokio::test]
    async fn end_of_input_inside_prompt_exits() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        let mut script = Script::new(&["elevate", "jdoe"]);
        interpreter.run(&mut script).await.unwrap();
        assert_eq!(script.prompts, ["> ", "uid: ", "ou: "]);
        assert_eq!(interpreter.directory().identity(), None);
    }

    #[tokio::test]
    async fn collect_query_keeps_raw_answers() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        let mut script = Script::new(&["person", "", "cn,mail"]);
        let command = interpreter
            .collect(Verb::Query, &mut script)
            .await
            .unwrap()
            .unwrap();
        match command {
            Command::Query {
                object_class,
                scope,
                attributes,
            } => {
                assert_eq!(object_class, "person");
                assert_eq!(scope, "");
                assert_eq!(attributes, "cn,mail");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            script.prompts,
            [
                "ObjectClass (Default: *): ",
                "Scope (Default: SUBTREE): ",
                "Attributes (Default: *): "
            ]
        );
    }

    #[tokio::test]
    async fn empty_query_equals_explicit_defaults() {
        let mut session = anonymous_session();
        session
            .expect_search()
            .withf(|request| {
                request.base == "dc=example,dc=com"
                    && request.filter == "(&(objectClass=*))"
                    && request.scope == SearchScope::Subtree
                    && request.attributes == ["*"]
            })
            .times(2)
            .returning(|_| Ok(vec![entry("dc=example,dc=com")]));

        let mut interpreter = interpreter_with(vec![session]).await;
        let mut script = Script::new(&["query", "", "", "", "query", "*", "SUBTREE", "*", "q"]);
        interpreter.run(&mut script).await.unwrap();
        assert_eq!(printed(&interpreter).matches("1 entries").count(), 2);
    }

    #[tokio::test]
    async fn change_base_rescopes_queries() {
        let mut session = anonymous_session();
        session
            .expect_search()
            .withf(|request| request.base == "dc=example,dc=com")
            .times(1)
            .returning(|_| {
                Ok(vec![
                    entry("dc=example,dc=com"),
                    entry("ou=People,dc=example,dc=com"),
                    entry(JDOE_DN),
                    entry("ou=Groups,dc=example,dc=com"),
                ])
            });
        session
            .expect_search()
            .withf(|request| request.base == "ou=People,dc=example,dc=com")
            .times(1)
            .returning(|_| Ok(vec![entry("ou=People,dc=example,dc=com"), entry(JDOE_DN)]));

        let mut interpreter = interpreter_with(vec![session]).await;
        let mut script = Script::new(&[
            "query",
            "",
            "",
            "",
            "cs",
            "ou=People,dc=example,dc=com",
            "query",
            "",
            "",
            "",
            "exit",
        ]);
        interpreter.run(&mut script).await.unwrap();

        let output = printed(&interpreter);
        assert!(output.contains("Current: dc=example,dc=com\n"));
        assert!(output.contains("4 entries"));
        assert!(output.contains("2 entries"));
        assert_eq!(
            interpreter.directory().search_base(),
            "ou=People,dc=example,dc=com"
        );
    }

    #[tokio::test]
    async fn change_base_rejects_blank_input() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter
            .execute(Command::ChangeBase {
                base: "  ".to_string(),
            })
            .await
            .unwrap();
        assert!(printed(&interpreter).starts_with("Keeping search base dc=example,dc=com"));
        assert_eq!(interpreter.directory().search_base(), "dc=example,dc=com");
    }

    #[tokio::test]
    async fn search_without_permission_prints_hint() {
        let mut session = anonymous_session();
        session
            .expect_search()
            .withf(|request| !request.base.is_empty())
            .returning(|_| Err(rejected("search", 50)));

        let mut interpreter = interpreter_with(vec![session]).await;
        let flow = interpreter
            .execute(Command::Query {
                object_class: "person".to_string(),
                scope: String::new(),
                attributes: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(printed(&interpreter).starts_with(SEARCH_HINT));
        assert_eq!(interpreter.directory().search_base(), "dc=example,dc=com");
        assert_eq!(interpreter.directory().identity(), None);
    }

    #[tokio::test]
    async fn invalid_scope_is_reported() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter
            .execute(Command::Query {
                object_class: String::new(),
                scope: "sideways".to_string(),
                attributes: String::new(),
            })
            .await
            .unwrap();
        assert!(printed(&interpreter).starts_with("Invalid query:"));
    }

    #[tokio::test]
    async fn malformed_filter_is_reported_as_invalid_query() {
        let mut session = anonymous_session();
        session
            .expect_search()
            .withf(|request| request.filter == "(&(objectClass=a(b))")
            .returning(|_| Err(Error::InvalidRequest("filter parse error".to_string())));

        let mut interpreter = interpreter_with(vec![session]).await;
        interpreter
            .execute(Command::Query {
                object_class: "a(b".to_string(),
                scope: String::new(),
                attributes: String::new(),
            })
            .await
            .unwrap();
        let output = printed(&interpreter);
        assert!(output.starts_with("Invalid query: Invalid request: filter parse error"));
        assert!(!output.contains(SEARCH_HINT));
    }

    #[tokio::test]
    async fn elevate_success_then_modify() {
        let mut elevated = MockLdapSession::new();
        elevated
            .expect_simple_bind()
            .with(eq(JDOE_DN), eq("secret"))
            .returning(|_, _| Ok(()));
        elevated
            .expect_who_am_i()
            .returning(|| Ok(format!("dn:{JDOE_DN}")));
        elevated
            .expect_modify()
            .withf(|dn, mods| {
                dn == JDOE_DN && mods == [ReplaceAttribute::single("mail", "j@x.org")]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        elevated.expect_unbind().returning(|| Ok(()));

        let mut interpreter = interpreter_with(vec![anonymous_session(), elevated]).await;
        let mut script = Script::new(&[
            "elevate", "jdoe", "People", "secret", "whoami", "modify", "mail", "j@x.org", "quit",
        ]);
        interpreter.run(&mut script).await.unwrap();

        let output = printed(&interpreter);
        assert!(output.contains(&format!("Connection elevated!\ncurrent user: {JDOE_DN}\n")));
        assert!(output.contains(&format!("dn:{JDOE_DN}\n")));
        assert!(output.contains(&format!("{JDOE_DN}: mail successfully modified!")));
        assert_eq!(interpreter.directory().identity(), Some(JDOE_DN));
    }

    #[tokio::test]
    async fn elevate_with_bad_password_falls_back_to_anonymous() {
        let mut refused = MockLdapSession::new();
        refused
            .expect_simple_bind()
            .returning(|_, _| Err(rejected("bind", RC_INVALID_CREDENTIALS)));
        refused.expect_unbind().returning(|| Ok(()));

        let mut interpreter = interpreter_with(vec![anonymous_session(), refused]).await;
        let mut script = Script::new(&["elevate", "jdoe", "People", "wrong", "whoami", "exit"]);
        interpreter.run(&mut script).await.unwrap();

        let output = printed(&interpreter);
        assert!(output.contains("Elevating connection failed, check credentials\n"));
        assert!(output.contains("Continuing as anonymous.\nanonymous\n"));
        assert_eq!(interpreter.directory().identity(), None);
    }

    #[tokio::test]
    async fn elevate_transport_error_falls_back_to_anonymous() {
        let mut connector_failure = MockLdapSession::new();
        connector_failure
            .expect_simple_bind()
            .returning(|_, _| Err(Error::Connect("connection reset".to_string())));
        connector_failure.expect_unbind().returning(|| Ok(()));

        let mut interpreter = interpreter_with(vec![anonymous_session(), connector_failure]).await;
        let flow = interpreter
            .execute(Command::Elevate {
                uid: "jdoe".to_string(),
                ou: "People".to_string(),
                password: SecretString::from("secret".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(printed(&interpreter)
            .contains("Elevating connection went wrong: transport failure"));
        assert_eq!(interpreter.directory().identity(), None);
    }

    #[tokio::test]
    async fn elevate_with_blank_uid_never_binds() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter
            .execute(Command::Elevate {
                uid: String::new(),
                ou: "People".to_string(),
                password: SecretString::from("secret".to_string()),
            })
            .await
            .unwrap();
        let output = printed(&interpreter);
        assert!(output.starts_with("Cannot build a bind DN:"));
        assert!(output.contains("Continuing as anonymous."));
    }

    #[tokio::test]
    async fn modify_while_anonymous_prints_elevation_hint() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter
            .execute(Command::Modify {
                attribute: "mail".to_string(),
                value: "j@x.org".to_string(),
            })
            .await
            .unwrap();
        assert!(printed(&interpreter)
            .starts_with("Modifying mail went wrong. Is your connection elevated?\n"));
    }

    #[tokio::test]
    async fn info_prints_metadata() {
        let mut interpreter = interpreter_with(vec![anonymous_session()]).await;
        interpreter.execute(Command::Info).await.unwrap();
        let output = printed(&interpreter);
        assert!(output.starts_with("DSA info (from DSE):\n"));
        assert!(output.contains("  defaultNamingContext:\n    dc=example,dc=com\n"));
    }
}
