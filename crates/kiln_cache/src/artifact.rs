//! Content-addressed value artifacts.
//!
//! Every cached value is stored as `<cache_dir>/values/<fingerprint>.val`.
//! The file starts with a little-endian `u32` header length, followed by a
//! bincode-encoded [`ArtifactHeader`] and then the raw payload. Identical
//! values produced by different nodes share one artifact.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_common::Fingerprint;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Subdirectory holding value artifacts.
pub const VALUES_SUBDIR: &str = "values";

/// File extension of value artifacts.
pub const VALUE_EXT: &str = "val";

/// Magic bytes identifying a Kiln artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// Current artifact format version.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Version of the tool that wrote the artifact.
    pub tool_version: String,

    /// Fingerprint of the payload.
    pub checksum: Fingerprint,
}

/// Reads and writes value artifacts under one cache directory.
pub struct ArtifactStore {
    dir: PathBuf,
    tool_version: String,
}

impl ArtifactStore {
    /// Creates a store rooted at `<cache_dir>/values`.
    pub fn new(cache_dir: &Path, tool_version: &str) -> Self {
        Self {
            dir: cache_dir.join(VALUES_SUBDIR),
            tool_version: tool_version.to_string(),
        }
    }

    /// Returns the path of the artifact with `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{VALUE_EXT}"))
    }

    /// Writes `data` and returns its key.
    ///
    /// The key is the payload fingerprint, so an existing artifact with the
    /// same key already holds these bytes and is left alone, unless it no
    /// longer reads back.
    pub fn write(&self, fingerprint: &Fingerprint, data: &[u8]) -> Result<String, CacheError> {
        let key = fingerprint.to_string();
        let path = self.path_for(&key);
        if path.is_file() && self.read(&key).is_some() {
            return Ok(key);
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            tool_version: self.tool_version.clone(),
            checksum: Fingerprint::of(data),
        };
        let bytes = encode_artifact(&header, data)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })?;
        Ok(key)
    }

    /// Reads and validates the artifact with `key`.
    ///
    /// Any problem (missing file, bad header, version or checksum mismatch)
    /// is a miss.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        match self.load(key) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!("artifact {key} unusable: {e}");
                None
            }
        }
    }

    /// Reads the artifact with `key`, reporting why it is unusable.
    pub fn load(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(key);
        let raw = std::fs::read(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        decode_artifact(&path, &raw)
    }

    /// Deletes every artifact whose key is not in `live`.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, live: &BTreeSet<String>) -> Result<usize, CacheError> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| CacheError::Io {
                    path: self.dir.clone(),
                    source: e,
                })?
                .path();
            let stale = match path.extension().and_then(|e| e.to_str()) {
                Some(VALUE_EXT) => path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| !live.contains(stem)),
                // Leftovers of an interrupted write.
                Some("tmp") => true,
                _ => false,
            };
            if stale {
                std::fs::remove_file(&path).map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn encode_artifact(header: &ArtifactHeader, data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header_bytes = bincode::serde::encode_to_vec(header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    let header_len = header_bytes.len() as u32;
    let mut out = Vec::with_capacity(4 + header_bytes.len() + data.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(data);
    Ok(out)
}

fn decode_artifact(path: &Path, raw: &[u8]) -> Result<Vec<u8>, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let len_bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("truncated header length"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|&end| end <= raw.len())
        .ok_or_else(|| invalid("truncated header"))?;

    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..header_end], bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != ARTIFACT_MAGIC {
        return Err(invalid("bad magic bytes"));
    }
    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: ARTIFACT_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[header_end..];
    let actual = Fingerprint::of(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(payload.to_vec())
}
