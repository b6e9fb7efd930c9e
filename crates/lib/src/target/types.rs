use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a target produces when linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
  /// A static library other targets can link against.
  Library,
  /// A runnable program.
  Executable,
}

impl TargetKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      TargetKind::Library => "library",
      TargetKind::Executable => "executable",
    }
  }
}

impl std::fmt::Display for TargetKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Immutable description of a single compilation target.
///
/// Set-like fields (`include_paths`, `packages`, `dependencies`) drop duplicates
/// but keep first-insertion order so that generated command lines are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
  pub name: String,
  pub kind: TargetKind,
  pub source_directories: Vec<PathBuf>,
  pub include_paths: Vec<PathBuf>,
  pub packages: Vec<String>,
  pub compiler_flags: Vec<String>,
  pub standard: Option<String>,
  pub linked_libraries: Vec<String>,
  pub precompiled_header: Option<PathBuf>,
  pub dependencies: Vec<String>,
}

impl TargetDescriptor {
  pub fn new(name: impl Into<String>, kind: TargetKind) -> Self {
    Self {
      name: name.into(),
      kind,
      source_directories: Vec::new(),
      include_paths: Vec::new(),
      packages: Vec::new(),
      compiler_flags: Vec::new(),
      standard: None,
      linked_libraries: Vec::new(),
      precompiled_header: None,
      dependencies: Vec::new(),
    }
  }

  pub fn library(name: impl Into<String>) -> Self {
    Self::new(name, TargetKind::Library)
  }

  pub fn executable(name: impl Into<String>) -> Self {
    Self::new(name, TargetKind::Executable)
  }

  pub fn with_source_directory(mut self, dir: impl Into<PathBuf>) -> Self {
    self.source_directories.push(dir.into());
    self
  }

  pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
    push_unique(&mut self.include_paths, path.into());
    self
  }

  pub fn with_package(mut self, package: impl Into<String>) -> Self {
    push_unique(&mut self.packages, package.into());
    self
  }

  pub fn with_compiler_flag(mut self, flag: impl Into<String>) -> Self {
    self.compiler_flags.push(flag.into());
    self
  }

  pub fn with_compiler_flags<I, S>(mut self, flags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.compiler_flags.extend(flags.into_iter().map(Into::into));
    self
  }

  pub fn with_standard(mut self, standard: impl Into<String>) -> Self {
    self.standard = Some(standard.into());
    self
  }

  pub fn with_linked_library(mut self, library: impl Into<String>) -> Self {
    self.linked_libraries.push(library.into());
    self
  }

  pub fn with_precompiled_header(mut self, header: impl Into<PathBuf>) -> Self {
    self.precompiled_header = Some(header.into());
    self
  }

  pub fn with_dependency(mut self, target: impl Into<String>) -> Self {
    push_unique(&mut self.dependencies, target.into());
    self
  }

  /// File name of the artifact the link step produces.
  pub fn artifact_file_name(&self) -> String {
    match self.kind {
      TargetKind::Library => format!("lib{}.a", self.name),
      TargetKind::Executable if cfg!(windows) => format!("{}.exe", self.name),
      TargetKind::Executable => self.name.clone(),
    }
  }

  /// Location of the linked artifact under `build_dir`.
  pub fn artifact_path(&self, build_dir: &Path) -> PathBuf {
    build_dir.join(self.artifact_file_name())
  }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
  if !items.contains(&item) {
    items.push(item);
  }
}
