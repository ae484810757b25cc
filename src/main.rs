use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use idxsync::shell::{Flow, Shell};
use idxsync::transport::{auth, Credentials, Gateway, HttpTransport};
use idxsync::{Config, SessionState};

#[derive(Parser, Debug)]
#[command(name = "idxsync")]
#[command(version)]
#[command(about = "Mirror HTTPS directory-index archives behind a login gateway")]
#[command(long_about = r#"
Interactive shell for an archive that publishes its data as HTML directory
listings. Logs in through the archive's login gateway, then lets you browse
remote directories and mirror them to local disk, downloading only new and
changed files.

Credentials are read from EARTHDATA_USERNAME / EARTHDATA_PASSWORD, then
~/.netrc, then prompted for.

Examples:
  idxsync                                   Start the shell in the current directory
  idxsync --local ~/data --remote /ICEBRIDGE/ILATM1B
  idxsync -c "cd ILATM1B/2009.10.16" -c rsync
"#)]
struct Cli {
    /// Config file (default: <config dir>/idxsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Archive host
    #[arg(long, env = "IDXSYNC_HOST")]
    host: Option<String>,

    /// Remote directory to start in
    #[arg(long, value_name = "PATH")]
    remote: Option<String>,

    /// Local directory to start in (default: current directory)
    #[arg(long, value_name = "DIR")]
    local: Option<PathBuf>,

    /// Start with verbose output off
    #[arg(short, long)]
    quiet: bool,

    /// Start with checksum comparison on
    #[arg(long)]
    checksum: bool,

    /// Debug logging to stderr
    #[arg(long)]
    debug: bool,

    /// Run this command instead of reading from stdin (repeatable)
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    commands: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(remote) = cli.remote {
        config.start_collection = remote;
    }
    if cli.quiet {
        config.verbose = false;
    }
    if cli.checksum {
        config.checksum = true;
    }

    let local = match cli.local {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let session = SessionState::new(&config, &local)
        .with_context(|| format!("Cannot use {} as local directory", local.display()))?;

    let mut transport = HttpTransport::new(&config)?;
    let gateway = Gateway::new(&config.login_host);
    let url = session.start_path().dir_url(session.base_url());
    let initial = Credentials::discover(&config.login_host)?;
    let creds = auth::login(
        &mut transport,
        &gateway,
        &url,
        config.retries,
        initial,
        || Credentials::prompt(&config.login_host),
    )
    .with_context(|| format!("Could not log in to {}", config.login_host))?;
    tracing::debug!("logged in as {}", creds.username);

    let interactive = cli.commands.is_empty() && io::stdin().is_terminal();
    let mut shell = Shell::new(config, session, transport, io::stdout())
        .with_progress(io::stderr().is_terminal());

    if !cli.commands.is_empty() {
        for command in &cli.commands {
            if shell.execute(command) == Flow::Exit {
                break;
            }
        }
        return Ok(());
    }

    shell.run(io::stdin().lock(), interactive)?;
    Ok(())
}
