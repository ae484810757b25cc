//! Command grammar for the interactive shell.

use clap::{Parser, Subcommand};

use crate::error::{Result, SyncError};

#[derive(Debug, Parser)]
#[command(
    name = "idxsync",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List remote directories (the current one by default)
    Ls { paths: Vec<String> },

    /// Change the remote directory (no argument: back to the start collection)
    Cd { path: Option<String> },

    /// Change the local directory
    Lcd { path: String },

    /// Create local directories
    Mkdir {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show the remote and local directories
    Pwd,

    /// Download new and changed files of one remote directory
    Sync {
        remote: Option<String>,
        local: Option<String>,
        /// Only entries whose names match this regular expression
        #[arg(long = "match", value_name = "REGEX")]
        pattern: Option<String>,
    },

    /// Like sync, descending into sub-directories
    Rsync {
        remote: Option<String>,
        local: Option<String>,
        #[arg(long = "match", value_name = "REGEX")]
        pattern: Option<String>,
    },

    /// Download every file of one remote directory
    Mget {
        remote: Option<String>,
        local: Option<String>,
        #[arg(long = "match", value_name = "REGEX")]
        pattern: Option<String>,
    },

    /// Download one file
    Get { name: String, local: Option<String> },

    /// Toggle checksum comparison
    Checksum,

    /// Toggle verbose output
    Verbose,

    /// Set the request timeout in seconds
    Timeout { secs: u64 },

    /// Set the number of attempts per download
    Retry { attempts: u32 },

    /// Log in again with new credentials
    Login,

    /// Show the command list
    #[command(alias = "help")]
    Usage,

    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

/// Outcome of parsing one input line.
#[derive(Debug)]
pub enum Parsed {
    Empty,
    Command(Command),
    /// Rendered clap message: a usage error or `--help` output
    Message(String),
}

pub fn parse_line(line: &str) -> Result<Parsed> {
    let words = split_words(line)?;
    if words.is_empty() {
        return Ok(Parsed::Empty);
    }
    match Line::try_parse_from(&words) {
        Ok(parsed) => Ok(Parsed::Command(parsed.command)),
        Err(e) => Ok(Parsed::Message(e.render().to_string())),
    }
}

/// Help text for `usage`.
pub fn usage() -> String {
    use clap::CommandFactory;
    let mut cmd = Line::command();
    cmd.render_help().to_string()
}

/// Split a line into words. Single and double quotes group words with spaces.
pub fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = None;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(SyncError::InvalidPath(format!("unterminated quote in {:?}", line)));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
