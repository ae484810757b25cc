//! Change detection: decide what to do with one listing entry.

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::checksum::RemoteChecksum;
use crate::error::Result;
use crate::listing::RemoteEntry;
use crate::local::LocalEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Local copy is current
    Skip,
    /// Nothing local yet
    Fetch,
    /// Local copy differs from the remote one
    Overwrite,
    /// Remote directory; enter it when recursing
    Descend,
}

impl Decision {
    pub fn transfers(&self) -> bool {
        matches!(self, Self::Fetch | Self::Overwrite)
    }
}

/// Source of remote digests, consulted only in checksum mode.
pub trait ChecksumOracle {
    fn remote_checksum(&mut self, entry: &RemoteEntry) -> Result<RemoteChecksum>;
}

#[derive(Debug, Clone, Copy)]
pub struct ChangePolicy {
    pub mtime_tolerance: Duration,
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self {
            mtime_tolerance: Duration::from_secs(60),
        }
    }
}

impl ChangePolicy {
    pub fn new(mtime_tolerance: Duration) -> Self {
        Self { mtime_tolerance }
    }

    /// Rules apply in order; the first that matches decides.
    ///
    /// 1. missing locally: fetch
    /// 2. directory: descend
    /// 3. sizes differ: overwrite
    /// 4. checksum mode: overwrite on digest mismatch, otherwise skip
    /// 5. remote newer than local by more than the tolerance: overwrite
    /// 6. skip
    pub fn decide(
        &self,
        remote: &RemoteEntry,
        local: &mut LocalEntry,
        checksum_enabled: bool,
        oracle: &mut dyn ChecksumOracle,
    ) -> Result<Decision> {
        if !local.exists {
            return Ok(Decision::Fetch);
        }
        if remote.is_dir() {
            return Ok(Decision::Descend);
        }
        if remote.size.differs_from(local.size_bytes) {
            debug!(
                "{}: size {} vs local {}",
                remote.name, remote.size, local.size_bytes
            );
            return Ok(Decision::Overwrite);
        }
        if checksum_enabled {
            let expected = oracle.remote_checksum(remote)?;
            let actual = local.checksum(expected.kind)?;
            if expected.matches(&actual) {
                return Ok(Decision::Skip);
            }
            debug!(
                "{}: {} {} vs local {}",
                remote.name, expected.kind, expected.value, actual
            );
            return Ok(Decision::Overwrite);
        }
        if let (Some(remote_time), Some(local_time)) = (remote.modified_at, local.modified_at) {
            let remote_time = SystemTime::from(remote_time);
            // A tolerance past the end of time means nothing is ever newer
            let newer = local_time
                .checked_add(self.mtime_tolerance)
                .is_some_and(|limit| remote_time > limit);
            if newer {
                debug!("{}: remote copy is newer", remote.name);
                return Ok(Decision::Overwrite);
            }
        }
        Ok(Decision::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{checksum_bytes, ChecksumKind};
    use crate::error::SyncError;
    use crate::listing::RemoteSize;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Oracle that must not be asked.
    struct Unused;

    impl ChecksumOracle for Unused {
        fn remote_checksum(&mut self, entry: &RemoteEntry) -> Result<RemoteChecksum> {
            Err(SyncError::Checksum(format!("unexpected lookup for {}", entry.name)))
        }
    }

    struct Fixed(RemoteChecksum);

    impl ChecksumOracle for Fixed {
        fn remote_checksum(&mut self, _entry: &RemoteEntry) -> Result<RemoteChecksum> {
            Ok(self.0.clone())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn local(size: u64, mtime: i64) -> LocalEntry {
        let mut entry = LocalEntry::missing(Path::new("/nonexistent"));
        entry.exists = true;
        entry.size_bytes = size;
        entry.modified_at = Some(SystemTime::from(at(mtime)));
        entry
    }

    fn file(size: u64, mtime: i64) -> RemoteEntry {
        RemoteEntry::file("f.dat", RemoteSize::Exact(size)).with_modified(at(mtime))
    }

    #[test]
    fn test_missing_local_fetches() {
        let policy = ChangePolicy::default();
        let mut missing = LocalEntry::missing(Path::new("/nonexistent"));
        let decision = policy
            .decide(&file(10, 0), &mut missing, true, &mut Unused)
            .unwrap();
        assert_eq!(decision, Decision::Fetch);
    }

    #[test]
    fn test_directory_descends() {
        let policy = ChangePolicy::default();
        let dir = RemoteEntry::directory("sub");
        let mut existing = local(4096, 0);
        existing.is_dir = true;
        let decision = policy.decide(&dir, &mut existing, true, &mut Unused).unwrap();
        assert_eq!(decision, Decision::Descend);
    }

    #[test]
    fn test_size_mismatch_overwrites() {
        let policy = ChangePolicy::default();
        let decision = policy
            .decide(&file(100, 0), &mut local(99, 1000), false, &mut Unused)
            .unwrap();
        assert_eq!(decision, Decision::Overwrite);
    }

    #[test]
    fn test_newer_remote_overwrites() {
        let policy = ChangePolicy::default();
        let d = |remote: i64, local_t: i64| {
            policy
                .decide(&file(10, remote), &mut local(10, local_t), false, &mut Unused)
                .unwrap()
        };
        assert_eq!(d(1_000_000, 1_000_000), Decision::Skip);
        assert_eq!(d(1_000_059, 1_000_000), Decision::Skip);
        assert_eq!(d(1_000_060, 1_000_000), Decision::Skip);
        assert_eq!(d(1_000_061, 1_000_000), Decision::Overwrite);
        assert_eq!(d(1_000_000, 2_000_000), Decision::Skip);
    }

    #[test]
    fn test_huge_tolerance_never_overwrites() {
        let policy = ChangePolicy::new(Duration::from_secs(u64::MAX));
        let decision = policy
            .decide(&file(10, 2_000_000), &mut local(10, 0), false, &mut Unused)
            .unwrap();
        assert_eq!(decision, Decision::Skip);
    }

    #[test]
    fn test_unknown_size_and_time_skip() {
        let policy = ChangePolicy::default();
        let remote = RemoteEntry::file("f.dat", RemoteSize::Unknown);
        let decision = policy
            .decide(&remote, &mut local(10, 0), false, &mut Unused)
            .unwrap();
        assert_eq!(decision, Decision::Skip);
    }

    #[test]
    fn test_checksum_mode_detects_content_change() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.dat");
        std::fs::write(&path, b"aaaa").unwrap();
        let mut entry = LocalEntry::probe(&path).unwrap();
        let mtime = entry.modified_at.unwrap();
        let remote = RemoteEntry::file("f.dat", RemoteSize::Exact(4))
            .with_modified(DateTime::<Utc>::from(mtime));
        let policy = ChangePolicy::default();

        let mut same = Fixed(RemoteChecksum::new(
            ChecksumKind::Md5,
            checksum_bytes(ChecksumKind::Md5, b"aaaa"),
        ));
        assert_eq!(
            policy.decide(&remote, &mut entry, true, &mut same).unwrap(),
            Decision::Skip
        );

        let mut different = Fixed(RemoteChecksum::new(
            ChecksumKind::Md5,
            checksum_bytes(ChecksumKind::Md5, b"bbbb"),
        ));
        assert_eq!(
            policy.decide(&remote, &mut entry, true, &mut different).unwrap(),
            Decision::Overwrite
        );

        // Checksum off: same size, same mtime
        assert_eq!(
            policy.decide(&remote, &mut entry, false, &mut Unused).unwrap(),
            Decision::Skip
        );
    }

    #[test]
    fn test_oracle_error_propagates() {
        let policy = ChangePolicy::default();
        let result = policy.decide(&file(10, 0), &mut local(10, 0), true, &mut Unused);
        assert!(matches!(result, Err(SyncError::Checksum(_))));
    }

    proptest! {
        #[test]
        fn prop_missing_local_always_fetches(
            size in 0u64..1 << 40,
            mtime in 0i64..4_000_000_000,
            is_dir in any::<bool>(),
            checksum in any::<bool>(),
        ) {
            let remote = if is_dir { RemoteEntry::directory("d") } else { file(size, mtime) };
            let mut missing = LocalEntry::missing(Path::new("/nonexistent"));
            let decision = ChangePolicy::default()
                .decide(&remote, &mut missing, checksum, &mut Unused)
                .unwrap();
            prop_assert_eq!(decision, Decision::Fetch);
        }

        #[test]
        fn prop_equal_size_older_remote_skips(
            size in 0u64..1 << 40,
            remote_time in 0i64..2_000_000_000,
            ahead in 0i64..1_000_000,
        ) {
            let decision = ChangePolicy::default()
                .decide(&file(size, remote_time), &mut local(size, remote_time + ahead), false, &mut Unused)
                .unwrap();
            prop_assert_eq!(decision, Decision::Skip);
        }

        #[test]
        fn prop_decide_is_deterministic(
            remote_size in 0u64..1000,
            local_size in 0u64..1000,
            remote_time in 0i64..2_000_000_000,
            local_time in 0i64..2_000_000_000,
        ) {
            let policy = ChangePolicy::default();
            let first = policy
                .decide(&file(remote_size, remote_time), &mut local(local_size, local_time), false, &mut Unused)
                .unwrap();
            let second = policy
                .decide(&file(remote_size, remote_time), &mut local(local_size, local_time), false, &mut Unused)
                .unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(first == Decision::Skip || first == Decision::Overwrite);
        }
    }
}
