//! Compilation database (`compile_commands.json`) generation.
//!
//! Language servers and static analyzers read one entry per source file with
//! the exact command the build would run.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::execute::Toolset;
use crate::graph::{BuildGraph, ConfigError};
use crate::package::{PackageError, resolve_packages};
use crate::plan::{PlanError, PlanInputs, plan_target};

/// One entry of a compilation database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileCommand {
  pub directory: PathBuf,
  pub file: PathBuf,
  pub arguments: Vec<String>,
  pub output: PathBuf,
}

#[derive(Debug, Error)]
pub enum CompdbError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("target {target}: {source}")]
  Package {
    target: String,
    #[source]
    source: PackageError,
  },

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("failed to serialize compilation database: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
}

/// Compile commands for every unit of every target, in build order.
///
/// `directory` is recorded as the working directory of each command.
pub fn compile_database(
  graph: &BuildGraph,
  tools: &Toolset,
  build_dir: &Path,
  directory: &Path,
) -> Result<Vec<CompileCommand>, CompdbError> {
  let mut resolved = HashMap::new();
  for target in graph.order() {
    let flags = resolve_packages(tools.packages.as_ref(), &target.packages).map_err(|e| match e {
      PackageError::Unknown { package, message } => CompdbError::Config(ConfigError::UnknownPackage {
        target: target.name.clone(),
        package,
        message,
      }),
      source => CompdbError::Package {
        target: target.name.clone(),
        source,
      },
    })?;
    resolved.insert(target.name.clone(), flags);
  }

  // Link inputs never reach a compile command
  let artifacts = HashMap::new();
  let mut commands = Vec::new();
  for target in graph.order() {
    let inputs = PlanInputs::for_target(graph, target, &resolved, &artifacts);
    let plan = plan_target(target, &inputs, None, tools.fs.as_ref(), build_dir)?;
    for unit in &plan.units {
      let request = plan.compile_request(unit);
      commands.push(CompileCommand {
        directory: directory.to_path_buf(),
        file: unit.source.clone(),
        arguments: tools.toolchain.compile_command(&request),
        output: unit.object.clone(),
      });
    }
  }

  Ok(commands)
}

/// Write a compilation database as JSON.
///
/// Uses atomic write (write to temp, then rename).
pub fn write_compile_database(path: &Path, commands: &[CompileCommand]) -> Result<(), CompdbError> {
  let content = serde_json::to_string_pretty(commands).map_err(CompdbError::Serialize)?;

  let mut temp_name = path.as_os_str().to_os_string();
  temp_name.push(".tmp");
  let temp_path = PathBuf::from(temp_name);

  fs::write(&temp_path, content).map_err(|source| CompdbError::Write {
    path: temp_path.clone(),
    source,
  })?;
  fs::rename(&temp_path, path).map_err(|source| CompdbError::Write {
    path: path.to_path_buf(),
    source,
  })?;

  info!(path = %path.display(), entries = commands.len(), "wrote compilation database");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use tempfile::TempDir;

  use crate::graph::TargetRegistry;
  use crate::package::{PackageFlags, StaticPackageResolver};
  use crate::target::TargetDescriptor;
  use crate::util::testutil::{FakeToolchain, MemoryFs};

  fn fixture() -> (Toolset, BuildGraph) {
    let fs = Arc::new(MemoryFs::new());
    fs.write("src/core/a.cpp", "");
    fs.write("src/core/b.cpp", "");
    fs.write("src/app/main.cpp", "");

    let resolver = StaticPackageResolver::new().with_package(
      "fmt",
      PackageFlags::new(vec!["-I/opt/fmt/include".to_string()], vec!["-lfmt".to_string()]),
    );
    let toolchain = Arc::new(FakeToolchain::new(fs.clone()));
    let tools = Toolset::new(fs, Arc::new(resolver), toolchain);

    let mut registry = TargetRegistry::new();
    registry
      .register(
        TargetDescriptor::library("core")
          .with_source_directory("src/core")
          .with_package("fmt"),
      )
      .unwrap();
    registry
      .register(
        TargetDescriptor::executable("app")
          .with_source_directory("src/app")
          .with_dependency("core"),
      )
      .unwrap();
    (tools, registry.finalize().unwrap())
  }

  #[test]
  fn one_entry_per_unit_in_build_order() {
    let (tools, graph) = fixture();
    let commands = compile_database(&graph, &tools, Path::new("build"), Path::new("/work")).unwrap();

    let files: Vec<_> = commands.iter().map(|c| c.file.clone()).collect();
    assert_eq!(
      files,
      vec![
        PathBuf::from("src/core/a.cpp"),
        PathBuf::from("src/core/b.cpp"),
        PathBuf::from("src/app/main.cpp"),
      ]
    );
    assert!(commands.iter().all(|c| c.directory == Path::new("/work")));
    assert!(commands[0].arguments.contains(&"-I/opt/fmt/include".to_string()));
    assert_eq!(commands[0].output, PathBuf::from("build/core/obj/0-core/a.cpp.o"));
  }

  #[test]
  fn unknown_package_is_a_config_error() {
    let (tools, _) = fixture();
    let mut registry = TargetRegistry::new();
    registry
      .register(
        TargetDescriptor::library("gui")
          .with_source_directory("src/core")
          .with_package("gtk4"),
      )
      .unwrap();
    let graph = registry.finalize().unwrap();

    let err = compile_database(&graph, &tools, Path::new("build"), Path::new("/work")).unwrap_err();
    assert!(matches!(err, CompdbError::Config(ConfigError::UnknownPackage { .. })));
  }

  #[test]
  fn writes_json_array() {
    let (tools, graph) = fixture();
    let commands = compile_database(&graph, &tools, Path::new("build"), Path::new("/work")).unwrap();

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("compile_commands.json");
    write_compile_database(&path, &commands).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["file"], "src/app/main.cpp");
    assert!(entries[2]["arguments"].is_array());
  }
}
