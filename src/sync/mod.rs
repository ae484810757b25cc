//! Directory-tree synchronization.
//!
//! Walks remote listings depth-first in server order, asks the change policy
//! about every file, and downloads what it says to. Failures are contained:
//! a file that fails to download is recorded and the walk moves on; a
//! directory whose listing fails is recorded and its subtree skipped.

mod oracle;

use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::fetch::{FetchSpec, Fetcher};
use crate::listing::{Lister, RemoteEntry};
use crate::local::{self, LocalEntry};
use crate::policy::{ChangePolicy, Decision};
use crate::session::{RemotePath, SessionState};
use crate::transport::{Gateway, Transport};

pub use oracle::DirectoryDigests;

/// How one invocation walks the tree.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Enter sub-directories
    pub recursive: bool,
    /// Download every file regardless of the policy
    pub force: bool,
    /// Only consider top-level entries whose names match
    pub filter: Option<Regex>,
    pub checksum_enabled: bool,
}

/// Something that went wrong for one file or one subtree.
#[derive(Debug)]
pub struct SyncFailure {
    pub url: Url,
    pub path: PathBuf,
    pub error: SyncError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Counters and failures from one sync invocation.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub overwritten: usize,
    pub skipped: usize,
    pub dirs_created: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn transferred(&self) -> usize {
        self.fetched + self.overwritten
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Receives progress events while a sync runs. Every method defaults to a no-op.
pub trait SyncObserver {
    fn entering(&self, _url: &Url, _local: &Path) {}
    fn decided(&self, _entry: &RemoteEntry, _local: &Path, _decision: Decision) {}
    /// Called before each download; a returned bar is advanced by the fetcher.
    fn transfer_started(
        &self,
        _url: &Url,
        _dest: &Path,
        _size: Option<u64>,
    ) -> Option<ProgressBar> {
        None
    }
    fn transfer_finished(&self, _dest: &Path, _bytes: u64) {}
    fn dir_created(&self, _path: &Path) {}
    fn failed(&self, _failure: &SyncFailure) {}
}

pub struct NoopObserver;
impl SyncObserver for NoopObserver {}

static NOOP: NoopObserver = NoopObserver;

/// Knobs shared by every invocation, taken from config and session.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub base_url: Url,
    pub gateway: Gateway,
    pub policy: ChangePolicy,
    pub chunk_size: usize,
    pub mode: u32,
    pub retries: u32,
}

impl SyncSettings {
    pub fn new(config: &Config, session: &SessionState) -> Self {
        Self {
            base_url: session.base_url().clone(),
            gateway: Gateway::new(&config.login_host),
            policy: ChangePolicy::new(config.mtime_tolerance()),
            chunk_size: config.chunk_size,
            mode: session.mode,
            retries: session.retries,
        }
    }
}

pub struct Orchestrator<'o, L, T> {
    lister: L,
    transport: T,
    settings: SyncSettings,
    observer: &'o dyn SyncObserver,
}

impl<'o, L: Lister, T: Transport> Orchestrator<'o, L, T> {
    pub fn new(lister: L, transport: T, settings: SyncSettings) -> Self {
        Self {
            lister,
            transport,
            settings,
            observer: &NOOP,
        }
    }

    pub fn with_observer(mut self, observer: &'o dyn SyncObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Mirror the files of one directory. Sub-directories are not entered.
    pub fn sync(
        &self,
        remote: &RemotePath,
        local: &Path,
        mut options: SyncOptions,
    ) -> Result<SyncReport> {
        options.recursive = false;
        options.force = false;
        self.run(remote, local, &options)
    }

    /// Mirror a whole tree.
    pub fn rsync(
        &self,
        remote: &RemotePath,
        local: &Path,
        mut options: SyncOptions,
    ) -> Result<SyncReport> {
        options.recursive = true;
        options.force = false;
        self.run(remote, local, &options)
    }

    /// Download every file of one directory, changed or not.
    pub fn mget(
        &self,
        remote: &RemotePath,
        local: &Path,
        mut options: SyncOptions,
    ) -> Result<SyncReport> {
        options.recursive = false;
        options.force = true;
        self.run(remote, local, &options)
    }

    /// Download the single file `name` from `remote` into `local`.
    pub fn get(
        &self,
        remote: &RemotePath,
        local: &Path,
        name: &str,
        checksum_enabled: bool,
    ) -> Result<SyncReport> {
        let entries = self.lister.list(remote)?;
        let entry = entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                SyncError::NotFound(format!(
                    "{} in {}",
                    name,
                    remote.dir_url(&self.settings.base_url)
                ))
            })?;
        if entry.is_dir() {
            return Err(SyncError::InvalidPath(format!(
                "{} is a directory; use rsync",
                name
            )));
        }

        let mut report = SyncReport::default();
        self.prepare_root(local, &mut report)?;
        let mut digests = DirectoryDigests::new(
            &self.transport,
            &self.settings.gateway,
            &self.settings.base_url,
            remote,
            &entries,
        );
        let dest = local.join(&entry.name);
        let decision = if dest.exists() {
            Decision::Overwrite
        } else {
            Decision::Fetch
        };
        self.observer.decided(entry, &dest, decision);
        self.transfer(
            remote,
            entry,
            &dest,
            decision,
            checksum_enabled,
            &mut digests,
            &mut report,
        )?;
        Ok(report)
    }

    /// Walk `remote` into `local` with explicit options.
    pub fn run(
        &self,
        remote: &RemotePath,
        local: &Path,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.prepare_root(local, &mut report)?;
        self.walk(remote, local, options, true, &mut report)?;
        Ok(report)
    }

    fn prepare_root(&self, local: &Path, report: &mut SyncReport) -> Result<()> {
        if !local.exists() {
            local::create_dir_all(local, self.settings.mode)?;
            report.dirs_created += 1;
            self.observer.dir_created(local);
        }
        Ok(())
    }

    fn walk(
        &self,
        remote: &RemotePath,
        local: &Path,
        options: &SyncOptions,
        top: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let dir_url = remote.dir_url(&self.settings.base_url);
        self.observer.entering(&dir_url, local);
        let entries = self.lister.list(remote)?;
        let mut digests = DirectoryDigests::new(
            &self.transport,
            &self.settings.gateway,
            &self.settings.base_url,
            remote,
            &entries,
        );

        for entry in &entries {
            if top {
                if let Some(filter) = &options.filter {
                    if !filter.is_match(&entry.name) {
                        continue;
                    }
                }
            }
            let dest = local.join(&entry.name);
            let file_url = || remote.file_url(&self.settings.base_url, &entry.name);

            if entry.is_dir() {
                if options.recursive {
                    self.descend(remote, entry, &dest, options, report);
                }
                continue;
            }

            let decision = if options.force {
                if dest.exists() {
                    Decision::Overwrite
                } else {
                    Decision::Fetch
                }
            } else {
                let mut local_entry = match LocalEntry::probe(&dest) {
                    Ok(found) => found,
                    Err(e) => {
                        self.record(report, file_url(), &dest, e);
                        continue;
                    }
                };
                match self.settings.policy.decide(
                    entry,
                    &mut local_entry,
                    options.checksum_enabled,
                    &mut digests,
                ) {
                    Ok(decision) => decision,
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        self.record(report, file_url(), &dest, e);
                        continue;
                    }
                }
            };
            self.observer.decided(entry, &dest, decision);

            if !decision.transfers() {
                report.skipped += 1;
                continue;
            }
            self.transfer(
                remote,
                entry,
                &dest,
                decision,
                options.checksum_enabled,
                &mut digests,
                report,
            )?;
        }
        Ok(())
    }

    /// Enter a sub-directory. Any failure, a lost login included, is
    /// recorded and confined to it.
    fn descend(
        &self,
        remote: &RemotePath,
        entry: &RemoteEntry,
        dest: &Path,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) {
        let child = remote.child(&entry.name);
        let url = child.dir_url(&self.settings.base_url);

        if !dest.exists() {
            if let Err(e) = local::create_dir_all(dest, self.settings.mode) {
                self.record(report, url, dest, e);
                return;
            }
            report.dirs_created += 1;
            self.observer.dir_created(dest);
        } else if !dest.is_dir() {
            let err = SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "a file is in the way of a directory",
            ));
            self.record(report, url, dest, err);
            return;
        }

        self.observer.decided(entry, dest, Decision::Descend);
        if let Err(e) = self.walk(&child, dest, options, false, report) {
            self.record(report, url, dest, e);
        }
    }

    /// Download one file. Only authentication failures escape.
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &self,
        remote: &RemotePath,
        entry: &RemoteEntry,
        dest: &Path,
        decision: Decision,
        checksum_enabled: bool,
        digests: &mut DirectoryDigests<'_, T>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let url = remote.file_url(&self.settings.base_url, &entry.name);
        let checksum = if checksum_enabled {
            digests.expected(&entry.name)
        } else {
            None
        };

        let bar = self
            .observer
            .transfer_started(&url, dest, entry.size.approx_bytes());
        let spec = FetchSpec {
            expected_size: entry.size.exact(),
            modified_at: entry.modified_at,
            checksum,
            progress: bar.as_ref(),
        };
        let fetcher = Fetcher::new(&self.transport, self.settings.gateway.clone())
            .with_chunk_size(self.settings.chunk_size)
            .with_mode(self.settings.mode)
            .with_retries(self.settings.retries);
        let result = fetcher.fetch(&url, dest, &spec);
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        match result {
            Ok(bytes) => {
                match decision {
                    Decision::Overwrite => report.overwritten += 1,
                    _ => report.fetched += 1,
                }
                report.bytes_transferred += bytes;
                self.observer.transfer_finished(dest, bytes);
                Ok(())
            }
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                self.record(report, url, dest, e);
                Ok(())
            }
        }
    }

    fn record(&self, report: &mut SyncReport, url: Url, path: &Path, error: SyncError) {
        warn!("{}: {}", url, error);
        let failure = SyncFailure {
            url,
            path: path.to_path_buf(),
            error,
        };
        self.observer.failed(&failure);
        report.failures.push(failure);
    }
}

/// Compile a `--match` pattern.
pub fn compile_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            debug!("filtering entries with {:?}", p);
            Regex::new(p)
                .map_err(|e| SyncError::InvalidPath(format!("bad pattern {:?}: {}", p, e)))
        })
        .transpose()
}
