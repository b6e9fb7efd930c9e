//! Implementation of the `mei compdb` command.
//!
//! Writes `compile_commands.json` into the build directory without running
//! any compiler.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use mei_lib::compdb::write_compile_database;
use mei_lib::execute::Toolset;
use mei_lib::orchestrator::Orchestrator;
use mei_lib::toolchain::GccToolchain;

use crate::DirArgs;
use crate::output::{print_stat, print_success};

pub fn cmd_compdb(script: &Path, dirs: &DirArgs) -> Result<()> {
  let config = super::build_config(dirs, None);
  let directory = std::env::current_dir().context("Failed to determine working directory")?;

  let project = Orchestrator::from_script(script, Toolset::local(GccToolchain::default()), config)
    .with_context(|| format!("Failed to evaluate build script: {}", script.display()))?
    .finalize()
    .context("Invalid target configuration")?;

  let commands = project
    .compile_database(&directory)
    .context("Failed to compute compile commands")?;

  let build_dir = project.config().build_dir();
  fs::create_dir_all(build_dir).with_context(|| format!("Failed to create {}", build_dir.display()))?;
  let path = build_dir.join("compile_commands.json");
  write_compile_database(&path, &commands)?;

  print_success("Compilation database written");
  print_stat("Entries", &commands.len().to_string());
  print_stat("Path", &path.display().to_string());
  Ok(())
}
