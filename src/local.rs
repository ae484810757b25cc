//! Local filesystem side: entry probing, lazy checksums, directory creation.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::checksum::{ChecksumKind, Digest};
use crate::error::{Result, SyncError};

/// Local counterpart of a remote entry.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub modified_at: Option<SystemTime>,
    checksum: Option<(ChecksumKind, String)>,
}

impl LocalEntry {
    /// Stat `path`. A missing file is not an error.
    pub fn probe(path: &Path) -> Result<Self> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Self {
                path: path.to_path_buf(),
                exists: true,
                is_dir: meta.is_dir(),
                size_bytes: meta.len(),
                modified_at: meta.modified().ok(),
                checksum: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::missing(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn missing(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: false,
            is_dir: false,
            size_bytes: 0,
            modified_at: None,
            checksum: None,
        }
    }

    /// Digest of the local file, computed on first use and cached per kind.
    pub fn checksum(&mut self, kind: ChecksumKind) -> Result<String> {
        if let Some((cached_kind, value)) = &self.checksum {
            if *cached_kind == kind {
                return Ok(value.clone());
            }
        }
        let value = hash_file(&self.path, kind)?;
        self.checksum = Some((kind, value.clone()));
        Ok(value)
    }
}

/// Hash a file's full content with the given checksum kind.
pub fn hash_file(path: &Path, kind: ChecksumKind) -> Result<String> {
    let mut file = File::open(path)?;
    let mut digest = Digest::new(kind);
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        digest.update(&buffer[..n]);
    }
    Ok(digest.finish())
}

/// `mkdir -p` with permission bits applied to created directories.
pub fn create_dir_all(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)?;
    Ok(())
}

/// Apply permission bits to an open file. No-op off unix.
pub fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (file, mode);
        Ok(())
    }
}

/// Fails unless `path` is an existing directory we can create files in.
pub fn ensure_writable_dir(path: &Path) -> Result<()> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::LocalPathNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(SyncError::LocalPathNotFound(path.to_path_buf()));
    }
    // Probe by creating (and immediately dropping) an anonymous temp file
    tempfile::tempfile_in(path).map_err(|_| SyncError::LocalPathNotWritable(path.to_path_buf()))?;
    Ok(())
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}

/// Normalize a path without requiring it to exist (unlike canonicalize)
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            c => normalized.push(c),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_missing() {
        let tmp = TempDir::new().unwrap();
        let entry = LocalEntry::probe(&tmp.path().join("nope")).unwrap();
        assert!(!entry.exists);
        assert!(entry.modified_at.is_none());
    }

    #[test]
    fn test_probe_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        fs::write(&path, vec![7u8; 100]).unwrap();
        let entry = LocalEntry::probe(&path).unwrap();
        assert!(entry.exists);
        assert!(!entry.is_dir);
        assert_eq!(entry.size_bytes, 100);
        assert!(entry.modified_at.is_some());
    }

    #[test]
    fn test_checksum_cached() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let mut entry = LocalEntry::probe(&path).unwrap();
        let first = entry.checksum(ChecksumKind::Md5).unwrap();
        assert_eq!(first, "5d41402abc4b2a76b9719d911017c592");
        // Cached value survives the file changing underneath
        fs::write(&path, "changed").unwrap();
        assert_eq!(entry.checksum(ChecksumKind::Md5).unwrap(), first);
    }

    #[test]
    fn test_create_dir_all_nested() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a/b/c");
        create_dir_all(&nested, 0o755).unwrap();
        assert!(nested.is_dir());
        // Existing directories are fine
        create_dir_all(&nested, 0o755).unwrap();
    }

    #[test]
    fn test_ensure_writable_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(ensure_writable_dir(tmp.path()).is_ok());

        let missing = tmp.path().join("missing");
        assert!(matches!(
            ensure_writable_dir(&missing),
            Err(SyncError::LocalPathNotFound(_))
        ));

        let file = tmp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            ensure_writable_dir(&file),
            Err(SyncError::LocalPathNotFound(_))
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/data/a/../b/./c")),
            PathBuf::from("/data/b/c")
        );
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
    }
}
