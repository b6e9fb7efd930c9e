//! Package resolution.
//!
//! Targets name packages (`"fmt"`, `"shaderc"`); a [`PackageResolver`] turns
//! each name into the compiler and linker flags needed to use it.

use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Flags contributed by a resolved package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFlags {
  /// Flags for the compiler, e.g. `-I/usr/include/fmt -DFMT_SHARED`.
  pub include_flags: Vec<String>,
  /// Flags for the linker, e.g. `-lfmt`.
  pub link_flags: Vec<String>,
}

impl PackageFlags {
  pub fn new(include_flags: Vec<String>, link_flags: Vec<String>) -> Self {
    Self {
      include_flags,
      link_flags,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageError {
  /// The resolver does not know the package.
  #[error("unknown package {package}: {message}")]
  Unknown { package: String, message: String },

  /// The resolver itself could not run.
  #[error("package resolver unavailable: {message}")]
  Unavailable { message: String },
}

pub trait PackageResolver: Send + Sync {
  fn resolve(&self, package: &str) -> Result<PackageFlags, PackageError>;
}

/// Resolve every package of a target, in declaration order.
///
/// Stops at the first package that fails.
pub fn resolve_packages(resolver: &dyn PackageResolver, packages: &[String]) -> Result<Vec<PackageFlags>, PackageError> {
  packages.iter().map(|package| resolver.resolve(package)).collect()
}

/// Resolver backed by a fixed table of packages.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageResolver {
  packages: HashMap<String, PackageFlags>,
}

impl StaticPackageResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_package(mut self, name: impl Into<String>, flags: PackageFlags) -> Self {
    self.packages.insert(name.into(), flags);
    self
  }
}

impl PackageResolver for StaticPackageResolver {
  fn resolve(&self, package: &str) -> Result<PackageFlags, PackageError> {
    self.packages.get(package).cloned().ok_or_else(|| PackageError::Unknown {
      package: package.to_string(),
      message: "not in package table".to_string(),
    })
  }
}

/// Resolver that queries `pkg-config`.
///
/// Results are memoized for the lifetime of the resolver.
#[derive(Debug)]
pub struct PkgConfigResolver {
  program: String,
  resolved: Mutex<HashMap<String, PackageFlags>>,
}

impl Default for PkgConfigResolver {
  fn default() -> Self {
    Self::new(std::env::var("PKG_CONFIG").unwrap_or_else(|_| "pkg-config".to_string()))
  }
}

impl PkgConfigResolver {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      resolved: Mutex::new(HashMap::new()),
    }
  }

  fn query(&self, package: &str, mode: &str) -> Result<Vec<String>, PackageError> {
    debug!(program = %self.program, package = %package, mode = %mode, "querying pkg-config");

    let output = Command::new(&self.program)
      .arg(mode)
      .arg(package)
      .output()
      .map_err(|e| PackageError::Unavailable {
        message: format!("{}: {}", self.program, e),
      })?;

    if !output.status.success() {
      return Err(PackageError::Unknown {
        package: package.to_string(),
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(
      String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .map(str::to_string)
        .collect(),
    )
  }
}

impl PackageResolver for PkgConfigResolver {
  fn resolve(&self, package: &str) -> Result<PackageFlags, PackageError> {
    if let Ok(cache) = self.resolved.lock()
      && let Some(flags) = cache.get(package)
    {
      return Ok(flags.clone());
    }

    let flags = PackageFlags::new(self.query(package, "--cflags")?, self.query(package, "--libs")?);

    if let Ok(mut cache) = self.resolved.lock() {
      cache.insert(package.to_string(), flags.clone());
    }
    Ok(flags)
  }
}
