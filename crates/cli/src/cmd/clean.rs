//! Implementation of the `mei clean` command.

use std::fs;

use anyhow::{Context, Result};

use crate::DirArgs;
use crate::output::{print_info, print_success};

/// Remove the build directory, including the fingerprint cache.
pub fn cmd_clean(dirs: &DirArgs) -> Result<()> {
  let config = super::build_config(dirs, None);
  let build_dir = config.build_dir();

  if !build_dir.exists() {
    print_info(&format!("Nothing to clean at {}", build_dir.display()));
    return Ok(());
  }

  fs::remove_dir_all(build_dir).with_context(|| format!("Failed to remove {}", build_dir.display()))?;
  print_success(&format!("Removed {}", build_dir.display()));
  Ok(())
}
