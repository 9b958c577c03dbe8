//! ldapsh - interactive LDAP client
//!
//! Connects anonymously to a directory server, derives the search base from the server's
//! default naming context and reads commands from standard input.
//!
//! # Logging
//!
//! Diagnostics go to stderr. `-v` enables info, `-vv` debug; without `-v` the `RUST_LOG`
//! environment variable is honoured and the default is `error`.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use ldapsh::{Interpreter, StdinLines};
use ldapsh_directory::{
    Directory, DirectoryConfig, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_LDAP_PORT,
    DEFAULT_OPERATION_TIMEOUT_SECS,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Interactive LDAP client
#[derive(Parser, Debug)]
#[command(name = "ldapsh")]
#[command(version, about, long_about = None, disable_help_flag = true)]
struct Args {
    /// Directory server host
    #[arg(short = 'h', long)]
    host: String,

    /// Directory server port
    #[arg(short, long, default_value_t = DEFAULT_LDAP_PORT)]
    port: u16,

    /// Connect over LDAPS
    #[arg(long)]
    ssl: bool,

    /// Accept any TLS certificate
    #[arg(long)]
    no_tls_verify: bool,

    /// Extra PEM root certificate for TLS verification
    #[arg(long, value_name = "PATH")]
    ca_cert: Option<PathBuf>,

    /// Initial search base (defaults to the server's default naming context)
    #[arg(short, long, value_name = "DN")]
    base: Option<String>,

    /// Timeout for each directory operation
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_OPERATION_TIMEOUT_SECS)]
    timeout: u64,

    /// Timeout for establishing a connection
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_CONNECTION_TIMEOUT_SECS)]
    connect_timeout: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Args {
    fn directory_config(&self) -> Result<DirectoryConfig> {
        let mut config = DirectoryConfig::new(&self.host, self.port)?
            .with_tls(self.ssl)
            .with_tls_verification(!self.no_tls_verify)
            .with_operation_timeout_secs(self.timeout)
            .with_connection_timeout_secs(self.connect_timeout);

        if let Some(path) = &self.ca_cert {
            config = config.with_tls_ca_cert(path.clone());
        }
        if let Some(base) = &self.base {
            config = config.with_search_base(base);
        }

        config.check()?;
        Ok(config)
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.directory_config()?;
    let url = config.url();
    let directory = Directory::connect(config)
        .await
        .with_context(|| format!("could not open a session on {url}"))?;

    let mut interpreter = Interpreter::new(directory, std::io::stdout());
    interpreter.banner()?;

    let mut input = StdinLines::new();
    interpreter.run(&mut input).await?;

    info!("closing session");
    interpreter.into_directory().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["ldapsh", "-h", "ldap.example.com"]).unwrap();
        assert_eq!(args.port, 389);
        assert!(!args.ssl);

        let config = args.directory_config().unwrap();
        assert_eq!(config.url(), "ldap://ldap.example.com:389");
        assert!(config.search_base().is_none());
    }

    #[test]
    fn ssl_port_and_base() {
        let args = Args::try_parse_from([
            "ldapsh",
            "-h",
            "dc01.corp.local",
            "-p",
            "636",
            "--ssl",
            "--no-tls-verify",
            "-b",
            "ou=Staff,dc=corp,dc=local",
            "--timeout",
            "30",
        ])
        .unwrap();

        let config = args.directory_config().unwrap();
        assert_eq!(config.url(), "ldaps://dc01.corp.local:636");
        assert!(!config.tls_verify());
        assert_eq!(config.search_base(), Some("ou=Staff,dc=corp,dc=local"));
        assert_eq!(config.operation_timeout().as_secs(), 30);
    }

    #[test]
    fn host_is_required() {
        let err = Args::try_parse_from(["ldapsh", "-p", "389"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn out_of_range_timeout_is_rejected() {
        let args =
            Args::try_parse_from(["ldapsh", "-h", "localhost", "--timeout", "0"]).unwrap();
        assert!(args.directory_config().is_err());
    }
}
