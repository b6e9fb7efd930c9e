//! Build configuration.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::consts::{CACHE_FILENAME, DEFAULT_BUILD_DIR, ENV_BUILD_DIR, ENV_JOBS};

/// Configuration for a single build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
  /// Maximum number of tool invocations running at once.
  pub jobs: usize,

  /// Root directory for objects, precompiled headers and linked artifacts.
  pub build_dir: PathBuf,

  /// Location of the persisted fingerprint cache.
  pub cache_path: PathBuf,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self::new(DEFAULT_BUILD_DIR)
  }
}

impl BuildConfig {
  /// Configuration rooted at `build_dir`, with the cache inside it.
  pub fn new(build_dir: impl Into<PathBuf>) -> Self {
    let build_dir = build_dir.into();
    Self {
      jobs: num_cpus(),
      cache_path: build_dir.join(CACHE_FILENAME),
      build_dir,
    }
  }

  /// Defaults overridden by `MEI_BUILD_DIR` and `MEI_JOBS`.
  ///
  /// Unparseable or zero job counts are ignored with a warning.
  pub fn from_env() -> Self {
    let mut config = match std::env::var_os(ENV_BUILD_DIR) {
      Some(dir) if !dir.is_empty() => Self::new(PathBuf::from(dir)),
      _ => Self::default(),
    };

    if let Ok(jobs) = std::env::var(ENV_JOBS) {
      match jobs.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.jobs = n,
        _ => warn!(value = %jobs, "ignoring invalid {}", ENV_JOBS),
      }
    }

    config
  }

  /// Move the build directory, keeping the cache inside it.
  pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
    self.build_dir = build_dir.into();
    self.cache_path = self.build_dir.join(CACHE_FILENAME);
    self
  }

  pub fn with_jobs(mut self, jobs: usize) -> Self {
    self.jobs = jobs.max(1);
    self
  }

  pub fn build_dir(&self) -> &Path {
    &self.build_dir
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
