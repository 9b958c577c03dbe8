//! Prompted line input.

use async_trait::async_trait;
use secrecy::SecretString;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Source of prompted input lines.
///
/// `Ok(None)` signals end of input.
#[async_trait]
pub trait LineSource: Send {
    /// Shows `prompt` and waits for the next line.
    async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Like [`LineSource::read_line`], for values that must not be logged.
    async fn read_secret(&mut self, prompt: &str) -> io::Result<Option<SecretString>> {
        Ok(self.read_line(prompt).await?.map(SecretString::from))
    }
}

/// Reads lines from standard input, writing prompts to standard output.
pub struct StdinLines {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinLines {
    /// Wraps the process's standard input.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinLines {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        {
            let mut stdout = io::stdout().lock();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
        }
        self.lines.next_line().await
    }
}
