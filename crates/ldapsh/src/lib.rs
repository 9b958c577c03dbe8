//! Interactive shell for browsing and editing an LDAP directory.
//!
//! The binary wires a [`Directory`](ldapsh_directory::Directory) to an [`Interpreter`] reading
//! from standard input.

#![deny(missing_docs)]

pub mod command;
pub mod interpreter;
pub mod prompt;

pub use command::{Command, Verb, USAGE};
pub use interpreter::{Flow, Interpreter};
pub use prompt::{LineSource, StdinLines};
