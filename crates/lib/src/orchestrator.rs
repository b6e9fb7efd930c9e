//! High-level entry point bundling targets with their collaborators.
//!
//! An [`Orchestrator`] collects targets during the configuration phase.
//! [`Orchestrator::finalize`] validates them and returns a [`Project`], which
//! can be built any number of times against the same cache.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::compdb::{CompdbError, CompileCommand, compile_database};
use crate::config::BuildConfig;
use crate::eval::{EvalError, evaluate_build_script};
use crate::execute::{self, BuildError, Toolset};
use crate::graph::{BuildGraph, ConfigError, TargetRegistry};
use crate::report::BuildReport;
use crate::target::TargetDescriptor;

/// Configuration phase: targets are registered, nothing runs yet.
#[derive(Debug)]
pub struct Orchestrator {
  registry: TargetRegistry,
  tools: Toolset,
  config: BuildConfig,
}

impl Orchestrator {
  pub fn new(tools: Toolset, config: BuildConfig) -> Self {
    Self {
      registry: TargetRegistry::new(),
      tools,
      config,
    }
  }

  /// Start from the targets declared by a build script.
  pub fn from_script(path: &Path, tools: Toolset, config: BuildConfig) -> Result<Self, EvalError> {
    Ok(Self {
      registry: evaluate_build_script(path)?,
      tools,
      config,
    })
  }

  pub fn register_target(&mut self, descriptor: TargetDescriptor) -> Result<(), ConfigError> {
    self.registry.register(descriptor)
  }

  pub fn registry(&self) -> &TargetRegistry {
    &self.registry
  }

  /// Validate references and cycles, fixing the build order.
  pub fn finalize(self) -> Result<Project, ConfigError> {
    Ok(Project {
      graph: self.registry.finalize()?,
      tools: self.tools,
      config: self.config,
    })
  }
}

/// A validated target graph ready to build.
#[derive(Debug)]
pub struct Project {
  graph: BuildGraph,
  tools: Toolset,
  config: BuildConfig,
}

impl Project {
  pub fn graph(&self) -> &BuildGraph {
    &self.graph
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  pub async fn build(&self, cancel: CancellationToken) -> Result<BuildReport, BuildError> {
    execute::build(&self.graph, &self.tools, &self.config, cancel).await
  }

  /// Compile commands for every unit, run from `directory`.
  pub fn compile_database(&self, directory: &Path) -> Result<Vec<CompileCommand>, CompdbError> {
    compile_database(&self.graph, &self.tools, &self.config.build_dir, directory)
  }
}
