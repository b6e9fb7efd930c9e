//! Persisted fingerprint cache.
//!
//! Records, per target, the fingerprint and flag signature each object was
//! built from, the precompiled header state, and a hash of the last link's
//! inputs. The planner compares the current state against these records to
//! decide what is stale.
//!
//! # Storage Layout
//!
//! ```text
//! {build_dir}/.mei-cache.json
//! {
//!   "version": 2,
//!   "checksum": "<sha256 of the serialized targets map>",
//!   "targets": { "<target>": { "units": {...}, "header": {...}, "link": {...} } }
//! }
//! ```
//!
//! A missing, unreadable, corrupt, tampered or wrong-version file is treated as
//! an empty cache. That costs a full rebuild but never produces wrong artifacts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::CACHE_VERSION;
use crate::fs::Fingerprint;
use crate::util::hash::{ObjectHash, hash_bytes};

/// A compiled object and what it was compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
  pub flags_hash: ObjectHash,
  pub fingerprint: Fingerprint,
  pub artifact: PathBuf,
  /// Headers the compiler reported reading, with their fingerprints at compile time.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub includes: BTreeMap<PathBuf, Fingerprint>,
}

/// A precompiled header and what it was compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
  pub header: PathBuf,
  pub flags_hash: ObjectHash,
  pub fingerprint: Fingerprint,
  pub artifact: PathBuf,
}

/// The last successful link of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
  pub inputs_hash: ObjectHash,
  pub artifact: PathBuf,
}

/// Everything recorded about one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
  /// Keyed by source path.
  #[serde(default)]
  pub units: BTreeMap<PathBuf, UnitRecord>,
  #[serde(default)]
  pub header: Option<HeaderRecord>,
  #[serde(default)]
  pub link: Option<LinkRecord>,
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to read cache {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to parse cache {}: {source}", path.display())]
  Parse { path: PathBuf, source: serde_json::Error },

  #[error("unsupported cache version {found} (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("cache checksum mismatch")]
  ChecksumMismatch,

  #[error("failed to serialize cache: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write cache {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
  version: u32,
  checksum: String,
  targets: BTreeMap<String, TargetRecord>,
}

/// In-memory view of the fingerprint cache file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintCache {
  targets: BTreeMap<String, TargetRecord>,
}

impl FingerprintCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load the cache, falling back to an empty one on any failure.
  pub fn load(path: &Path) -> Self {
    match Self::try_load(path) {
      Ok(cache) => cache,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "discarding fingerprint cache");
        Self::new()
      }
    }
  }

  /// Load the cache strictly.
  ///
  /// A missing file is an empty cache; every other problem is an error.
  pub fn try_load(path: &Path) -> Result<Self, CacheError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no fingerprint cache");
        return Ok(Self::new());
      }
      Err(source) => {
        return Err(CacheError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let file: CacheFile = serde_json::from_str(&content).map_err(|source| CacheError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if file.version != CACHE_VERSION {
      return Err(CacheError::UnsupportedVersion {
        found: file.version,
        expected: CACHE_VERSION,
      });
    }

    if checksum(&file.targets)? != file.checksum {
      return Err(CacheError::ChecksumMismatch);
    }

    debug!(path = %path.display(), targets = file.targets.len(), "loaded fingerprint cache");
    Ok(Self { targets: file.targets })
  }

  /// Persist the cache.
  ///
  /// Uses atomic write (write to temp, then rename) so an interrupted save
  /// leaves the previous file intact.
  pub fn save(&self, path: &Path) -> Result<(), CacheError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(|source| CacheError::Write {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let file = CacheFile {
      version: CACHE_VERSION,
      checksum: checksum(&self.targets)?,
      targets: self.targets.clone(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(CacheError::Serialize)?;

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content).map_err(|source| CacheError::Write {
      path: temp_path.clone(),
      source,
    })?;
    fs::rename(&temp_path, path).map_err(|source| CacheError::Write {
      path: path.to_path_buf(),
      source,
    })?;

    debug!(path = %path.display(), targets = self.targets.len(), "saved fingerprint cache");
    Ok(())
  }

  pub fn target(&self, name: &str) -> Option<&TargetRecord> {
    self.targets.get(name)
  }

  /// Replace everything recorded for `name`.
  pub fn replace_target(&mut self, name: impl Into<String>, record: TargetRecord) {
    self.targets.insert(name.into(), record);
  }

  pub fn remove_target(&mut self, name: &str) -> Option<TargetRecord> {
    self.targets.remove(name)
  }

  pub fn target_names(&self) -> impl Iterator<Item = &str> {
    self.targets.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }
}

fn checksum(targets: &BTreeMap<String, TargetRecord>) -> Result<String, CacheError> {
  let serialized = serde_json::to_vec(targets).map_err(CacheError::Serialize)?;
  Ok(hash_bytes(&serialized).0)
}
