//! Remote directory listings.
//!
//! A listing is the parsed form of one server-generated index page. Parsing
//! sits behind [`Lister`] so the engine does not care how entries are found.

mod html;

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};
use crate::session::RemotePath;
use crate::transport::{Gateway, Transport};

pub use html::parse_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Size column of an index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteSize {
    /// Server printed `-` or nothing
    #[default]
    Unknown,
    /// Plain byte count
    Exact(u64),
    /// Human-readable size (`1.2M`); the true size is within `tolerance` of `bytes`
    Approximate { bytes: u64, tolerance: u64 },
}

impl RemoteSize {
    /// Parse a size token such as `123`, `1.2K`, `45M` or `-`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token == "-" {
            return Some(Self::Unknown);
        }
        let (number, unit) = match token.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&token[..idx], Some(c)),
            _ => (token, None),
        };
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return None;
        }

        let multiplier: u64 = match unit.map(|c| c.to_ascii_uppercase()) {
            None => 1,
            Some('K') => 1 << 10,
            Some('M') => 1 << 20,
            Some('G') => 1 << 30,
            Some('T') => 1 << 40,
            Some('P') => 1 << 50,
            Some(_) => return None,
        };

        match number.split_once('.') {
            None => {
                let value: u64 = number.parse().ok()?;
                if unit.is_none() {
                    Some(Self::Exact(value))
                } else {
                    Some(Self::Approximate {
                        bytes: value.checked_mul(multiplier)?,
                        tolerance: multiplier,
                    })
                }
            }
            Some((whole, frac)) => {
                if whole.is_empty() || frac.is_empty() || frac.contains('.') {
                    return None;
                }
                let value: f64 = number.parse().ok()?;
                let step = multiplier as f64 / 10f64.powi(frac.len() as i32);
                Some(Self::Approximate {
                    bytes: (value * multiplier as f64).round() as u64,
                    tolerance: step.ceil() as u64,
                })
            }
        }
    }

    /// True when a local file of `local` bytes cannot be the remote file.
    /// Unknown sizes never differ.
    pub fn differs_from(&self, local: u64) -> bool {
        match *self {
            Self::Unknown => false,
            Self::Exact(bytes) => bytes != local,
            Self::Approximate { bytes, tolerance } => bytes.abs_diff(local) > tolerance,
        }
    }

    pub fn exact(&self) -> Option<u64> {
        match *self {
            Self::Exact(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Best guess in bytes, for progress display.
    pub fn approx_bytes(&self) -> Option<u64> {
        match *self {
            Self::Unknown => None,
            Self::Exact(bytes) | Self::Approximate { bytes, .. } => Some(bytes),
        }
    }
}

impl fmt::Display for RemoteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "-"),
            Self::Exact(bytes) => write!(f, "{}", bytes),
            Self::Approximate { bytes, .. } => write!(f, "~{}", bytes),
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: RemoteSize,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: RemoteSize) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified_at: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: RemoteSize::Unknown,
            modified_at: None,
        }
    }

    pub fn with_modified(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

pub trait Lister {
    /// Entries of `dir`, in server order, names unique.
    fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>>;
}

/// Lists directories by fetching and parsing their HTML index pages.
pub struct HtmlLister<T> {
    transport: T,
    base_url: Url,
    gateway: Gateway,
    time_formats: Vec<String>,
}

impl<T: Transport> HtmlLister<T> {
    pub fn new(transport: T, base_url: Url, gateway: Gateway, time_formats: Vec<String>) -> Self {
        Self {
            transport,
            base_url,
            gateway,
            time_formats,
        }
    }
}

impl<T: Transport> Lister for HtmlLister<T> {
    fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let url = dir.dir_url(&self.base_url);
        let body = self.gateway.fetch_text(&self.transport, &url)?;
        if !looks_like_html(&body) {
            return Err(SyncError::listing(url.as_str(), "not an HTML index page"));
        }
        let entries = parse_index(&body, &url, &self.time_formats);
        debug!("{}: {} entries", url, entries.len());
        Ok(entries)
    }
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(4096)
        .collect::<String>()
        .to_ascii_lowercase();
    ["<!doctype html", "<html", "<head", "<body", "<table", "<pre", "<a "]
        .iter()
        .any(|marker| head.contains(marker))
}
