//! idxsync: mirror HTTPS directory-index archives to local disk.
//!
//! The archive serves plain Apache-style index pages behind a login gateway.
//! idxsync logs in once, keeps the session cookie, and walks those pages to
//! download only the files that are new or changed.
//!
//! Layers, leaves first:
//! - [`listing`]: index page to entries
//! - [`session`]: remote and local working directories
//! - [`policy`]: skip / fetch / overwrite per entry
//! - [`fetch`]: one download, written atomically
//! - [`sync`]: `sync`, `rsync`, `mget`, `get` over a tree
//! - [`shell`]: the interactive command loop

pub mod checksum;
pub mod config;
pub mod error;
pub mod fetch;
pub mod listing;
pub mod local;
pub mod policy;
pub mod progress;
pub mod session;
pub mod shell;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::{Result, SyncError};
pub use session::{RemotePath, SessionState};
