//! Single-file download.
//!
//! The body streams into a temp file next to the destination, which is
//! renamed into place only after every check passes. A failed attempt drops
//! the temp file and leaves the destination untouched.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use indicatif::ProgressBar;
use tracing::{debug, warn};
use url::Url;

use crate::checksum::{Digest, RemoteChecksum};
use crate::error::{Result, SyncError};
use crate::local;
use crate::transport::{Gateway, Transport};

/// What we know about the file before downloading it.
#[derive(Default, Clone)]
pub struct FetchSpec<'a> {
    /// Exact size from the listing; the body must match it
    pub expected_size: Option<u64>,
    /// Applied as the local mtime
    pub modified_at: Option<DateTime<Utc>>,
    /// Verified before the rename
    pub checksum: Option<RemoteChecksum>,
    pub progress: Option<&'a ProgressBar>,
}

pub struct Fetcher<T> {
    transport: T,
    gateway: Gateway,
    chunk_size: usize,
    mode: u32,
    retries: u32,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, gateway: Gateway) -> Self {
        Self {
            transport,
            gateway,
            chunk_size: 16 * 1024,
            mode: 0o775,
            retries: 1,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Total attempts per file (at least one)
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Download `url` to `dest`. Returns the number of bytes written.
    pub fn fetch(&self, url: &Url, dest: &Path, spec: &FetchSpec<'_>) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=self.retries {
            if let Some(pb) = spec.progress {
                pb.set_position(0);
            }
            match self.fetch_once(url, dest, spec) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    if attempt < self.retries {
                        warn!(
                            "attempt {} of {} for {} failed: {}",
                            attempt, self.retries, url, e
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if e.is_per_file() => e,
            Some(e) => SyncError::transfer(url.as_str(), e.to_string()),
            None => SyncError::transfer(url.as_str(), "no attempts made"),
        })
    }

    fn fetch_once(&self, url: &Url, dest: &Path, spec: &FetchSpec<'_>) -> Result<u64> {
        let fail = |reason: String| SyncError::transfer(url.as_str(), reason);

        let response = self.transport.get(url)?;
        if self.gateway.redirected_to_login(&response) {
            return Err(SyncError::AuthenticationRequired(format!(
                "{} redirected to the login gateway",
                url
            )));
        }
        if !response.is_success() {
            return Err(fail(format!("HTTP {}", response.status)));
        }
        let declared = response.content_length;
        let mut body = response.body;

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".idxsync-")
            .suffix(".part")
            .tempfile_in(dir)?;

        let mut digest = spec.checksum.as_ref().map(|c| Digest::new(c.kind));
        let mut buffer = vec![0u8; self.chunk_size];
        let mut received = 0u64;
        loop {
            let n = body
                .read(&mut buffer)
                .map_err(|e| fail(format!("read failed after {} bytes: {}", received, e)))?;
            if n == 0 {
                break;
            }
            tmp.write_all(&buffer[..n])?;
            if let Some(d) = digest.as_mut() {
                d.update(&buffer[..n]);
            }
            received += n as u64;
            if let Some(pb) = spec.progress {
                pb.set_position(received);
            }
        }
        tmp.flush()?;

        if let Some(declared) = declared {
            if declared != received {
                return Err(fail(format!(
                    "received {} of {} bytes",
                    received, declared
                )));
            }
        }
        if let Some(expected) = spec.expected_size {
            if expected != received {
                return Err(fail(format!(
                    "listing says {} bytes, received {}",
                    expected, received
                )));
            }
        }
        if let (Some(expected), Some(digest)) = (&spec.checksum, digest) {
            let actual = digest.finish();
            if !expected.matches(&actual) {
                return Err(fail(format!(
                    "{} mismatch: expected {}, got {}",
                    expected.kind, expected.value, actual
                )));
            }
        }

        if let Err(e) = local::set_mode(tmp.as_file(), self.mode) {
            warn!("could not set permissions on {}: {}", dest.display(), e);
        }
        if let Some(modified_at) = spec.modified_at {
            let mtime = FileTime::from_unix_time(
                modified_at.timestamp(),
                modified_at.timestamp_subsec_nanos(),
            );
            if let Err(e) = filetime::set_file_mtime(tmp.path(), mtime) {
                warn!("could not set mtime on {}: {}", dest.display(), e);
            }
        }

        tmp.persist(dest)
            .map_err(|e| fail(format!("rename into {} failed: {}", dest.display(), e.error)))?;
        debug!("{} -> {} ({} bytes)", url, dest.display(), received);
        Ok(received)
    }
}
