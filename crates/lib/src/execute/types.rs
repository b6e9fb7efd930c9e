//! Types shared by the build executor.

use std::sync::Arc;

use thiserror::Error;

use crate::fs::{LocalFs, SourceFs};
use crate::graph::ConfigError;
use crate::package::{PackageResolver, PkgConfigResolver};
use crate::toolchain::{GccToolchain, Toolchain};

/// The collaborators a build talks to.
#[derive(Clone)]
pub struct Toolset {
  pub fs: Arc<dyn SourceFs>,
  pub packages: Arc<dyn PackageResolver>,
  pub toolchain: Arc<dyn Toolchain>,
}

impl Toolset {
  pub fn new(fs: Arc<dyn SourceFs>, packages: Arc<dyn PackageResolver>, toolchain: Arc<dyn Toolchain>) -> Self {
    Self {
      fs,
      packages,
      toolchain,
    }
  }

  /// Local filesystem, `pkg-config` and the given compiler toolchain.
  pub fn local(toolchain: GccToolchain) -> Self {
    Self::new(
      Arc::new(LocalFs),
      Arc::new(PkgConfigResolver::default()),
      Arc::new(toolchain),
    )
  }
}

impl std::fmt::Debug for Toolset {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Toolset").finish_non_exhaustive()
  }
}

/// Errors that abort a build before or outside of any single target.
///
/// Failures of individual targets are reported in the
/// [`BuildReport`](crate::report::BuildReport), not here.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("build task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}
