//! Checksum and hashing utilities
//!
//! Archives publish per-file checksums in XML sidecar files next to the data
//! (`<DataFileContainer>` with `DistributedFileName`, `ChecksumType` and
//! `Checksum`). Supported kinds are MD5, SHA1, POSIX `cksum` and CRC32.

use std::fmt;
use std::str::FromStr;

use md5::Digest as _;

use crate::error::{Result, SyncError};

/// Available checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumKind {
    #[default]
    Md5,
    Sha1,
    /// POSIX `cksum`: CRC-32/CKSUM over data then length, printed in decimal
    Cksum,
    /// zlib CRC-32, printed in decimal
    Crc32,
}

impl FromStr for ChecksumKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "CKSUM" => Ok(Self::Cksum),
            "CRC32" | "CRC-32" => Ok(Self::Crc32),
            other => Err(SyncError::Checksum(format!(
                "unsupported checksum type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Cksum => "CKSUM",
            Self::Crc32 => "CRC32",
        };
        f.write_str(name)
    }
}

const CKSUM_TABLE: [u32; 256] = cksum_table();
const CRC32_TABLE: [u32; 256] = crc32_table();

const fn cksum_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut v = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            v = if v & 0x8000_0000 != 0 {
                (v << 1) ^ 0x04c1_1db7
            } else {
                v << 1
            };
            bit += 1;
        }
        table[i] = v;
        i += 1;
    }
    table
}

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut v = i as u32;
        let mut bit = 0;
        while bit < 8 {
            v = if v & 1 != 0 { (v >> 1) ^ 0xedb8_8320 } else { v >> 1 };
            bit += 1;
        }
        table[i] = v;
        i += 1;
    }
    table
}

/// Incremental digest over any supported kind.
pub enum Digest {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Cksum { crc: u32, len: u64 },
    Crc32(u32),
}

impl Digest {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Md5 => Self::Md5(md5::Md5::new()),
            ChecksumKind::Sha1 => Self::Sha1(sha1::Sha1::new()),
            ChecksumKind::Cksum => Self::Cksum { crc: 0, len: 0 },
            ChecksumKind::Crc32 => Self::Crc32(0xffff_ffff),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Cksum { crc, len } => {
                for &b in data {
                    *crc = cksum_step(*crc, b);
                }
                *len += data.len() as u64;
            }
            Self::Crc32(crc) => {
                for &b in data {
                    *crc = CRC32_TABLE[((*crc ^ b as u32) & 0xff) as usize] ^ (*crc >> 8);
                }
            }
        }
    }

    /// Render the final value the way the sidecar files print it.
    pub fn finish(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Cksum { mut crc, mut len } => {
                // Length is folded in least-significant byte first
                while len != 0 {
                    crc = cksum_step(crc, (len & 0xff) as u8);
                    len >>= 8;
                }
                (!crc).to_string()
            }
            Self::Crc32(crc) => (!crc).to_string(),
        }
    }
}

#[inline]
fn cksum_step(crc: u32, byte: u8) -> u32 {
    (crc << 8) ^ CKSUM_TABLE[((crc >> 24) ^ byte as u32) as usize]
}

/// Compute a checksum over an in-memory buffer.
pub fn checksum_bytes(kind: ChecksumKind, data: &[u8]) -> String {
    let mut digest = Digest::new(kind);
    digest.update(data);
    digest.finish()
}

/// Checksum published by the server for one remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChecksum {
    pub kind: ChecksumKind,
    pub value: String,
}

impl RemoteChecksum {
    pub fn new(kind: ChecksumKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Hex digests compare case-insensitively, decimal ones exactly.
    pub fn matches(&self, local: &str) -> bool {
        self.value.trim().eq_ignore_ascii_case(local.trim())
    }
}

/// Extract the checksum for `file_name` from an XML sidecar document.
///
/// Returns `Ok(None)` when the sidecar describes a different file.
pub fn parse_sidecar(xml: &str, file_name: &str) -> Result<Option<RemoteChecksum>> {
    let container = tag_text(xml, "DataFileContainer")
        .ok_or_else(|| SyncError::Checksum("sidecar has no DataFileContainer".to_string()))?;
    let distributed = tag_text(container, "DistributedFileName")
        .ok_or_else(|| SyncError::Checksum("sidecar has no DistributedFileName".to_string()))?;
    if distributed.trim() != file_name {
        return Ok(None);
    }
    let kind: ChecksumKind = tag_text(container, "ChecksumType")
        .ok_or_else(|| SyncError::Checksum("sidecar has no ChecksumType".to_string()))?
        .parse()?;
    let value = tag_text(container, "Checksum")
        .ok_or_else(|| SyncError::Checksum("sidecar has no Checksum".to_string()))?;
    Ok(Some(RemoteChecksum::new(kind, value.trim())))
}

/// Text between `<tag ...>` and the first `</tag>` after it.
fn tag_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}", tag);

    let mut from = 0;
    while let Some(pos) = xml[from..].find(&open) {
        let after_name = from + pos + open.len();
        let rest = &xml[after_name..];
        let body_start = match rest.chars().next() {
            Some('>') => after_name + 1,
            Some(c) if c.is_whitespace() => after_name + rest.find('>')? + 1,
            // a longer tag name sharing the prefix
            _ => {
                from = after_name;
                continue;
            }
        };

        let body = &xml[body_start..];
        let mut search = 0;
        while let Some(end) = body[search..].find(&close) {
            let end = search + end;
            if body[end + close.len()..].trim_start().starts_with('>') {
                return Some(&body[..end]);
            }
            search = end + close.len();
        }
        return None;
    }
    None
}

/// Find the XML sidecar for `name` among the names of the same listing.
///
/// The sidecar starts with the data file's stem and ends in `.xml`.
pub fn sidecar_for<'a, I>(name: &str, names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    if name.to_ascii_lowercase().ends_with(".xml") {
        return None;
    }
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    names.into_iter().find(|candidate| {
        *candidate != name
            && candidate
                .strip_prefix(stem)
                .is_some_and(|rest| rest.ends_with(".xml"))
    })
}
