//! Filesystem collaborator.
//!
//! The planner never touches the filesystem directly: it enumerates sources and
//! reads fingerprints through [`SourceFs`]. [`LocalFs`] is the implementation
//! backed by the real filesystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::SOURCE_EXTENSIONS;
use crate::util::hash::hash_file;

/// Opaque value used to detect that a file changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
  #[error("not found: {}", .0.display())]
  NotFound(PathBuf),

  #[error("failed to read {}: {message}", path.display())]
  Io { path: PathBuf, message: String },
}

pub trait SourceFs: Send + Sync {
  /// List compilable source files under `dir`, sorted by path.
  fn list_source_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError>;

  /// Compute the fingerprint of a file.
  fn read_fingerprint(&self, path: &Path) -> Result<Fingerprint, FsError>;

  fn exists(&self, path: &Path) -> bool {
    path.exists()
  }
}

/// Whether `path` has one of the recognized source extensions.
pub fn is_source_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
    .unwrap_or(false)
}

/// [`SourceFs`] over the local filesystem, fingerprinting files by SHA-256 content hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl SourceFs for LocalFs {
  fn list_source_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
    if !dir.is_dir() {
      return Err(FsError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
      let entry = entry.map_err(|e| FsError::Io {
        path: dir.to_path_buf(),
        message: e.to_string(),
      })?;
      if entry.file_type().is_file() && is_source_file(entry.path()) {
        files.push(entry.into_path());
      }
    }

    Ok(files)
  }

  fn read_fingerprint(&self, path: &Path) -> Result<Fingerprint, FsError> {
    hash_file(path).map(|hash| Fingerprint(hash.0)).map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound(path.to_path_buf())
      } else {
        FsError::Io {
          path: path.to_path_buf(),
          message: e.to_string(),
        }
      }
    })
  }
}
