//! Error types for idxsync.
//!
//! Errors are grouped by how far they are allowed to travel: path errors abort
//! the current command, listing errors abort one directory subtree, transfer
//! errors abort one file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed remote or local path typed by the user.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Local directory not found: {}", .0.display())]
    LocalPathNotFound(PathBuf),

    #[error("Local directory is not writable: {}", .0.display())]
    LocalPathNotWritable(PathBuf),

    /// The index page could not be fetched or is not an index page.
    #[error("Listing unavailable for {url}: {reason}")]
    ListingUnavailable { url: String, reason: String },

    /// The server answered with the login gateway instead of the content.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// A single file failed to download.
    #[error("Transfer failed for {url}: {reason}")]
    TransferError { url: String, reason: String },

    /// Network-level failure talking to the server.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checksum error: {0}")]
    Checksum(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    pub fn listing(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ListingUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransferError {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that a fresh login can fix.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationRequired(_))
    }

    /// True for errors confined to a single file.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::TransferError { .. })
    }
}
