//! User-facing output: listings, transfer lines, summaries.

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use indicatif::ProgressBar;
use tracing::{debug, warn};
use url::Url;

use crate::listing::{RemoteEntry, RemoteSize};
use crate::policy::Decision;
use crate::progress;
use crate::sync::{SyncFailure, SyncObserver, SyncReport};

/// Prints sync events as they happen. Transfers are shown only when verbose.
pub struct ConsoleObserver<'a, W: Write> {
    out: &'a RefCell<W>,
    verbose: bool,
    progress: bool,
}

impl<'a, W: Write> ConsoleObserver<'a, W> {
    pub fn new(out: &'a RefCell<W>, verbose: bool, progress: bool) -> Self {
        Self {
            out,
            verbose,
            progress,
        }
    }

    fn line(&self, text: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out.borrow_mut(), "{}", text) {
            warn!("could not write output: {}", e);
        }
    }
}

impl<W: Write> SyncObserver for ConsoleObserver<'_, W> {
    fn entering(&self, url: &Url, local: &Path) {
        if self.verbose {
            self.line(format_args!("{} {} -> {}", "sync".cyan(), url, local.display()));
        }
    }

    fn decided(&self, entry: &RemoteEntry, local: &Path, decision: Decision) {
        debug!("{}: {:?} ({})", entry.name, decision, local.display());
    }

    fn transfer_started(&self, url: &Url, dest: &Path, size: Option<u64>) -> Option<ProgressBar> {
        if !self.verbose {
            return None;
        }
        self.line(format_args!("{} -> {}", url, dest.display()));
        if !self.progress {
            return None;
        }
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(progress::file_bar(&name, size))
    }

    fn dir_created(&self, path: &Path) {
        if self.verbose {
            self.line(format_args!("{} {}", "mkdir".cyan(), path.display()));
        }
    }

    fn failed(&self, failure: &SyncFailure) {
        self.line(format_args!("{} {}", "error:".red().bold(), failure));
    }
}

/// One `ls` row: name (directories with a trailing `/`), modification time, size.
pub fn format_entry(entry: &RemoteEntry) -> String {
    let name = if entry.is_dir() {
        format!("{}/", entry.name).blue().bold().to_string()
    } else {
        entry.name.clone()
    };
    let modified = entry
        .modified_at
        .map(format_time)
        .unwrap_or_else(|| "-".to_string());
    let size = match entry.size {
        RemoteSize::Unknown => "-".to_string(),
        RemoteSize::Exact(bytes) => bytes.to_string(),
        RemoteSize::Approximate { bytes, .. } => format!("~{}", bytes),
    };
    format!("{:<16}  {:>12}  {}", modified, size, name)
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

/// Closing line for a sync command.
pub fn format_summary(report: &SyncReport) -> String {
    let counts = format!(
        "{} fetched, {} overwritten, {} skipped, {} directories created, {} bytes",
        report.fetched,
        report.overwritten,
        report.skipped,
        report.dirs_created,
        report.bytes_transferred
    );
    if report.is_clean() {
        counts.green().to_string()
    } else {
        format!("{}, {}", counts, format!("{} failed", report.failures.len()).red().bold())
    }
}
