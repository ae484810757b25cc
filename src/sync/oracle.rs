//! Remote checksums for one directory.
//!
//! A file's digest comes from its XML sidecar when the listing has one;
//! otherwise the file is streamed and hashed with MD5 without being stored.

use std::collections::HashMap;
use std::io::Read;

use tracing::{debug, warn};
use url::Url;

use crate::checksum::{parse_sidecar, sidecar_for, ChecksumKind, Digest, RemoteChecksum};
use crate::error::{Result, SyncError};
use crate::listing::RemoteEntry;
use crate::policy::ChecksumOracle;
use crate::session::RemotePath;
use crate::transport::{Gateway, Transport};

pub struct DirectoryDigests<'a, T> {
    transport: &'a T,
    gateway: &'a Gateway,
    base_url: &'a Url,
    dir: &'a RemotePath,
    names: Vec<String>,
    sidecars: HashMap<String, Option<RemoteChecksum>>,
}

impl<'a, T: Transport> DirectoryDigests<'a, T> {
    pub fn new(
        transport: &'a T,
        gateway: &'a Gateway,
        base_url: &'a Url,
        dir: &'a RemotePath,
        entries: &[RemoteEntry],
    ) -> Self {
        Self {
            transport,
            gateway,
            base_url,
            dir,
            names: entries
                .iter()
                .filter(|e| !e.is_dir())
                .map(|e| e.name.clone())
                .collect(),
            sidecars: HashMap::new(),
        }
    }

    /// Checksum published in the sidecar for `name`, if there is one.
    pub fn sidecar(&mut self, name: &str) -> Result<Option<RemoteChecksum>> {
        if let Some(cached) = self.sidecars.get(name) {
            return Ok(cached.clone());
        }
        let found = match sidecar_for(name, self.names.iter().map(String::as_str)) {
            Some(sidecar) => {
                let url = self.dir.file_url(self.base_url, sidecar);
                debug!("reading checksum sidecar {}", url);
                let xml = self.gateway.fetch_text(self.transport, &url)?;
                parse_sidecar(&xml, name)?
            }
            None => None,
        };
        self.sidecars.insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// Sidecar checksum for verifying a download. Lookup failures only warn.
    pub fn expected(&mut self, name: &str) -> Option<RemoteChecksum> {
        match self.sidecar(name) {
            Ok(found) => found,
            Err(e) => {
                warn!("no checksum for {}: {}", name, e);
                None
            }
        }
    }

    fn hash_remote(&self, name: &str) -> Result<RemoteChecksum> {
        let url = self.dir.file_url(self.base_url, name);
        let response = self.transport.get(&url)?;
        if self.gateway.redirected_to_login(&response) {
            return Err(SyncError::AuthenticationRequired(format!(
                "{} redirected to the login gateway",
                url
            )));
        }
        if !response.is_success() {
            return Err(SyncError::transfer(
                url.as_str(),
                format!("HTTP {}", response.status),
            ));
        }

        let mut body = response.body;
        let mut digest = Digest::new(ChecksumKind::Md5);
        let mut buffer = [0u8; 16 * 1024];
        loop {
            let n = body
                .read(&mut buffer)
                .map_err(|e| SyncError::transfer(url.as_str(), e.to_string()))?;
            if n == 0 {
                break;
            }
            digest.update(&buffer[..n]);
        }
        Ok(RemoteChecksum::new(ChecksumKind::Md5, digest.finish()))
    }
}

impl<T: Transport> ChecksumOracle for DirectoryDigests<'_, T> {
    fn remote_checksum(&mut self, entry: &RemoteEntry) -> Result<RemoteChecksum> {
        match self.sidecar(&entry.name)? {
            Some(checksum) => Ok(checksum),
            None => self.hash_remote(&entry.name),
        }
    }
}
