//! The interactive shell: reads command lines, runs them against the
//! session, prints results.
//!
//! Errors from a command are printed and the shell keeps going; only `exit`
//! (or end of input) ends the loop.

mod command;
mod console;

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::listing::{HtmlLister, Lister};
use crate::session::SessionState;
use crate::sync::{compile_filter, Orchestrator, SyncOptions, SyncReport, SyncSettings};
use crate::transport::{auth, Credentials, Gateway, Transport};

pub use command::{parse_line, split_words, usage, Command, Parsed};
pub use console::{format_entry, format_summary, ConsoleObserver};

pub const PROMPT: &str = "idxsync> ";

const LOGIN_HINT: &str = "run `login` to sign in again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

type Prompter = Box<dyn FnMut(&str) -> Result<Credentials>>;

pub struct Shell<T, W: Write> {
    config: Config,
    session: SessionState,
    transport: T,
    out: RefCell<W>,
    progress: bool,
    prompter: Prompter,
}

impl<T: Transport, W: Write> Shell<T, W> {
    pub fn new(config: Config, session: SessionState, transport: T, out: W) -> Self {
        Self {
            config,
            session,
            transport,
            out: RefCell::new(out),
            progress: false,
            prompter: Box::new(Credentials::prompt),
        }
    }

    /// Draw progress bars for downloads while verbose.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Where `login` gets credentials from (the terminal by default).
    pub fn with_prompter<P>(mut self, prompter: P) -> Self
    where
        P: FnMut(&str) -> Result<Credentials> + 'static,
    {
        self.prompter = Box::new(prompter);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn into_output(self) -> W {
        self.out.into_inner()
    }

    /// Read and run lines until `exit` or end of input.
    pub fn run<R: BufRead>(&mut self, mut input: R, interactive: bool) -> Result<()> {
        let mut line = String::new();
        loop {
            if interactive {
                let mut out = self.out.borrow_mut();
                write!(out, "{}", PROMPT)?;
                out.flush()?;
            }
            line.clear();
            if input.read_line(&mut line)? == 0 {
                if interactive {
                    writeln!(self.out.borrow_mut())?;
                }
                return Ok(());
            }
            if self.execute(&line) == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Run one line. Errors are printed, never returned.
    pub fn execute(&mut self, line: &str) -> Flow {
        let command = match parse_line(line) {
            Ok(Parsed::Empty) => return Flow::Continue,
            Ok(Parsed::Command(command)) => command,
            Ok(Parsed::Message(text)) => {
                self.print(text.trim_end());
                return Flow::Continue;
            }
            Err(e) => {
                self.report_error(&e);
                return Flow::Continue;
            }
        };
        match self.dispatch(command) {
            Ok(flow) => flow,
            Err(e) => {
                self.report_error(&e);
                Flow::Continue
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Ls { paths } => self.ls(&paths)?,
            Command::Cd { path } => {
                self.session.cd(path.as_deref())?;
                if self.session.verbose {
                    self.print(self.session.remote_url().as_str());
                }
            }
            Command::Lcd { path } => {
                let local = self.session.lcd(&path)?.display().to_string();
                if self.session.verbose {
                    self.print(&local);
                }
            }
            Command::Mkdir { names } => {
                for path in self.session.mkdir(&names)? {
                    if self.session.verbose {
                        self.print(&format!("{} {}", "mkdir".cyan(), path.display()));
                    }
                }
            }
            Command::Pwd => {
                let (url, local) = self.session.pwd();
                let text = format!("Remote: {}\nLocal:  {}", url, local.display());
                self.print(&text);
            }
            Command::Sync {
                remote,
                local,
                pattern,
            } => self.sync_command(Mode::Sync, remote, local, pattern)?,
            Command::Rsync {
                remote,
                local,
                pattern,
            } => self.sync_command(Mode::Rsync, remote, local, pattern)?,
            Command::Mget {
                remote,
                local,
                pattern,
            } => self.sync_command(Mode::Mget, remote, local, pattern)?,
            Command::Get { name, local } => self.get(&name, local.as_deref())?,
            Command::Checksum => {
                let on = self.session.toggle_checksum();
                self.print(&format!("checksum comparison {}", on_off(on)));
            }
            Command::Verbose => {
                let on = self.session.toggle_verbose();
                self.print(&format!("verbose output {}", on_off(on)));
            }
            Command::Timeout { secs } => {
                if secs == 0 {
                    return Err(SyncError::Config(
                        "timeout must be at least 1 second".into(),
                    ));
                }
                self.session.timeout = Duration::from_secs(secs);
                self.transport.set_timeout(self.session.timeout);
                self.print(&format!("timeout set to {}s", secs));
            }
            Command::Retry { attempts } => {
                if attempts == 0 {
                    return Err(SyncError::Config("retry needs at least 1 attempt".into()));
                }
                self.session.retries = attempts;
                self.print(&format!("downloads will be tried {} times", attempts));
            }
            Command::Login => self.login()?,
            Command::Usage => self.print(usage().trim_end()),
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    fn lister(&self) -> HtmlLister<&T> {
        HtmlLister::new(
            &self.transport,
            self.session.base_url().clone(),
            Gateway::new(&self.config.login_host),
            self.config.time_formats.clone(),
        )
    }

    fn ls(&self, paths: &[String]) -> Result<()> {
        let targets = if paths.is_empty() {
            vec![self.session.remote_path.clone()]
        } else {
            paths
                .iter()
                .map(|p| self.session.resolve_remote(Some(p)))
                .collect::<Result<Vec<_>>>()?
        };

        let lister = self.lister();
        let show_headers = targets.len() > 1;
        for target in &targets {
            if show_headers {
                let header = format!("{}:", target.dir_url(self.session.base_url()));
                self.print(&header.bold().to_string());
            }
            match lister.list(target) {
                Ok(entries) => {
                    for entry in &entries {
                        self.print(&format_entry(entry));
                    }
                }
                // One bad argument does not hide the others
                Err(e) if show_headers && !e.is_auth() => self.report_error(&e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn sync_command(
        &self,
        mode: Mode,
        remote: Option<String>,
        local: Option<String>,
        pattern: Option<String>,
    ) -> Result<()> {
        let remote = self.session.resolve_remote(remote.as_deref())?;
        let local = self.resolve_local_arg(local.as_deref())?;
        let options = SyncOptions {
            filter: compile_filter(pattern.as_deref())?,
            checksum_enabled: self.session.checksum_enabled,
            ..Default::default()
        };

        let observer = ConsoleObserver::new(&self.out, self.session.verbose, self.progress);
        let orchestrator = Orchestrator::new(self.lister(), &self.transport, self.settings())
            .with_observer(&observer);
        let report = match mode {
            Mode::Sync => orchestrator.sync(&remote, &local, options)?,
            Mode::Rsync => orchestrator.rsync(&remote, &local, options)?,
            Mode::Mget => orchestrator.mget(&remote, &local, options)?,
        };
        self.finish(&report);
        Ok(())
    }

    fn get(&self, name: &str, local: Option<&str>) -> Result<()> {
        let target = self.session.resolve_remote(Some(name))?;
        let (dir, file) = target
            .split_last()
            .ok_or_else(|| SyncError::InvalidPath(format!("{}: not a file", name)))?;
        let local = self.resolve_local_arg(local)?;

        let observer = ConsoleObserver::new(&self.out, self.session.verbose, self.progress);
        let orchestrator = Orchestrator::new(self.lister(), &self.transport, self.settings())
            .with_observer(&observer);
        let report = orchestrator.get(&dir, &local, file, self.session.checksum_enabled)?;
        self.finish(&report);
        Ok(())
    }

    fn login(&mut self) -> Result<()> {
        let gateway = Gateway::new(&self.config.login_host);
        let host = self.config.login_host.clone();
        let initial = (self.prompter)(&host)?;
        let url = self.session.start_path().dir_url(self.session.base_url());
        let prompter = &mut self.prompter;
        let creds = auth::login(
            &mut self.transport,
            &gateway,
            &url,
            self.session.retries,
            initial,
            || prompter(&host),
        )?;
        self.print(&format!("logged in as {}", creds.username.green()));
        Ok(())
    }

    fn settings(&self) -> SyncSettings {
        SyncSettings::new(&self.config, &self.session)
    }

    fn resolve_local_arg(&self, local: Option<&str>) -> Result<PathBuf> {
        match local {
            Some(l) if l.trim().is_empty() => Err(SyncError::InvalidPath("empty path".into())),
            other => Ok(self.session.resolve_local(other)),
        }
    }

    fn finish(&self, report: &SyncReport) {
        if self.session.verbose || !report.is_clean() {
            self.print(&format_summary(report));
        }
        if report.failures.iter().any(|f| f.error.is_auth()) {
            self.print(LOGIN_HINT);
        }
    }

    fn print(&self, text: &str) {
        if let Err(e) = writeln!(self.out.borrow_mut(), "{}", text) {
            warn!("could not write output: {}", e);
        }
    }

    fn report_error(&self, error: &SyncError) {
        self.print(&format!("{} {}", "error:".red().bold(), error));
        if error.is_auth() {
            self.print(LOGIN_HINT);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Sync,
    Rsync,
    Mget,
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
