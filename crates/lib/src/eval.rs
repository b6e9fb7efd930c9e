//! Build script evaluation.
//!
//! This module provides [`evaluate_build_script`], which runs a Lua build script
//! and returns the targets it declared, and [`load_build_graph`], which also
//! validates them into a [`BuildGraph`].

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, info};

use crate::graph::{BuildGraph, ConfigError, TargetRegistry};
use crate::lua::runtime;

/// Errors that can occur during build script evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  /// Lua evaluation error, including invalid target tables.
  #[error("lua error: {0}")]
  Lua(#[from] LuaError),

  /// The declared targets do not form a valid graph.
  #[error(transparent)]
  Config(#[from] ConfigError),
}

/// Evaluate a build script and return the registry of declared targets.
///
/// Duplicate target names are rejected while the script runs, so the error
/// points at the offending call.
pub fn evaluate_build_script(path: &Path) -> Result<TargetRegistry, EvalError> {
  debug!(path = %path.display(), "evaluating build script");
  let registry = Rc::new(RefCell::new(TargetRegistry::new()));

  {
    let lua = runtime::create_runtime(registry.clone())?;
    runtime::load_file(&lua, path)?;
    // lua is dropped here, releasing its references to the registry
  }

  let registry = std::mem::take(&mut *registry.borrow_mut());
  info!(path = %path.display(), targets = registry.len(), "evaluated build script");
  Ok(registry)
}

/// Evaluate a build script and finalize its targets into a graph.
pub fn load_build_graph(path: &Path) -> Result<BuildGraph, EvalError> {
  Ok(evaluate_build_script(path)?.finalize()?)
}
