//! Shell session state: where we are remotely and locally.
//!
//! Remote and local locations navigate independently. Remote paths are
//! resolved lexically and only checked for existence by the next listing;
//! local paths are checked when they change.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::local::{self, expand_tilde, normalize_path};

/// A directory on the archive host, as segments below the host root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an absolute path such as `/ICEBRIDGE/ILATM1B`.
    pub fn parse(path: &str) -> Result<Self> {
        let target = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self::root().resolve(&target)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent directory and final segment, or `None` at the root.
    pub fn split_last(&self) -> Option<(Self, &str)> {
        let (last, parent) = self.segments.split_last()?;
        Some((
            Self {
                segments: parent.to_vec(),
            },
            last.as_str(),
        ))
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Resolve `target` against this path without touching the network.
    ///
    /// Accepts `.`, `..`, absolute and relative paths; a single trailing `/` is
    /// allowed. `..` at the root stays at the root.
    pub fn resolve(&self, target: &str) -> Result<Self> {
        if target.trim().is_empty() {
            return Err(SyncError::InvalidPath("empty path".to_string()));
        }
        if target.contains("//") {
            return Err(SyncError::InvalidPath(format!(
                "{}: empty path segment",
                target
            )));
        }
        if target.contains('\\') || target.chars().any(char::is_control) {
            return Err(SyncError::InvalidPath(format!(
                "{}: illegal character in path",
                target.escape_debug()
            )));
        }

        let (mut segments, rest) = match target.strip_prefix('/') {
            Some(rest) => (Vec::new(), rest),
            None => (self.segments.clone(), target),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self { segments });
        }

        for segment in rest.split('/') {
            match segment {
                "" => {
                    return Err(SyncError::InvalidPath(format!(
                        "{}: empty path segment",
                        target
                    )))
                }
                "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name.to_string()),
            }
        }
        Ok(Self { segments })
    }

    /// Directory URL below `base`, always with a trailing `/`.
    pub fn dir_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(&self.segments);
            path.push("");
        }
        url
    }

    /// URL of the entry `name` inside this directory.
    pub fn file_url(&self, base: &Url, name: &str) -> Url {
        let mut url = base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(&self.segments);
            path.push(name);
        }
        url
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Per-shell state handed to every command handler.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub remote_path: RemotePath,
    local_path: PathBuf,
    start: RemotePath,
    base_url: Url,
    pub verbose: bool,
    pub checksum_enabled: bool,
    pub timeout: Duration,
    pub retries: u32,
    pub mode: u32,
}

impl SessionState {
    /// Build the session from config, starting in `local_path`.
    pub fn new(config: &Config, local_path: &Path) -> Result<Self> {
        let base_url = Url::parse(&config.base_url())
            .map_err(|e| SyncError::Config(format!("bad host {}: {}", config.host, e)))?;
        let start = RemotePath::parse(&config.start_collection)?;
        let local_path = absolute(local_path)?;
        local::ensure_writable_dir(&local_path)?;

        Ok(Self {
            remote_path: start.clone(),
            local_path,
            start,
            base_url,
            verbose: config.verbose,
            checksum_enabled: config.checksum,
            timeout: config.timeout(),
            retries: config.retries,
            mode: config.mode,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn start_path(&self) -> &RemotePath {
        &self.start
    }

    pub fn remote_url(&self) -> Url {
        self.remote_path.dir_url(&self.base_url)
    }

    /// Resolve a remote target without changing the session.
    pub fn resolve_remote(&self, target: Option<&str>) -> Result<RemotePath> {
        match target {
            Some(t) => self.remote_path.resolve(t),
            None => Ok(self.remote_path.clone()),
        }
    }

    /// Resolve a local target without changing the session.
    pub fn resolve_local(&self, target: Option<&str>) -> PathBuf {
        match target {
            Some(t) => normalize_path(&self.local_path.join(expand_tilde(t))),
            None => self.local_path.clone(),
        }
    }

    /// Change the remote directory. No argument returns to the start collection.
    pub fn cd(&mut self, target: Option<&str>) -> Result<&RemotePath> {
        let next = match target {
            Some(t) => self.remote_path.resolve(t)?,
            None => self.start.clone(),
        };
        self.remote_path = next;
        Ok(&self.remote_path)
    }

    /// Change the local directory. The target must already exist and be writable.
    pub fn lcd(&mut self, target: &str) -> Result<&Path> {
        if target.trim().is_empty() {
            return Err(SyncError::InvalidPath("empty path".to_string()));
        }
        let next = self.resolve_local(Some(target));
        local::ensure_writable_dir(&next)?;
        self.local_path = next;
        Ok(&self.local_path)
    }

    /// Create directories below the local directory. Does not change into them.
    pub fn mkdir(&self, names: &[String]) -> Result<Vec<PathBuf>> {
        if names.is_empty() {
            return Err(SyncError::InvalidPath("mkdir needs a name".to_string()));
        }
        let mut created = Vec::with_capacity(names.len());
        for name in names {
            if name.trim().is_empty() {
                return Err(SyncError::InvalidPath("empty directory name".to_string()));
            }
            let path = self.resolve_local(Some(name));
            local::create_dir_all(&path, self.mode)?;
            created.push(path);
        }
        Ok(created)
    }

    /// Current remote URL and local directory.
    pub fn pwd(&self) -> (Url, &Path) {
        (self.remote_url(), &self.local_path)
    }

    pub fn toggle_verbose(&mut self) -> bool {
        self.verbose = !self.verbose;
        self.verbose
    }

    pub fn toggle_checksum(&mut self) -> bool {
        self.checksum_enabled = !self.checksum_enabled;
        self.checksum_enabled
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(&path.to_string_lossy());
    if path.is_absolute() {
        Ok(normalize_path(&path))
    } else {
        Ok(normalize_path(&std::env::current_dir()?.join(path)))
    }
}
