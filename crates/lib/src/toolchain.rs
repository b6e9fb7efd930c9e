//! Compiler and linker collaborator.
//!
//! The executor never spawns compilers itself. Every compile, precompiled
//! header and link step goes through a [`Toolchain`], which runs one tool
//! invocation to completion and reports its exit status and diagnostics.
//!
//! [`GccToolchain`] drives GCC-compatible drivers (`g++`, `clang++`) and `ar`.
//! Compiles write a make-style depfile next to the object, and the headers
//! listed there come back in [`ToolOutput::dependencies`].

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::target::TargetKind;

/// A precompiled header available to a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecompiledHeader {
  /// The header as declared by the target.
  pub header: PathBuf,
  /// The compiled header artifact.
  pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
  pub target: String,
  pub source: PathBuf,
  pub output: PathBuf,
  pub flags: Vec<String>,
  pub standard: Option<String>,
  pub precompiled_header: Option<PrecompiledHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRequest {
  pub target: String,
  pub header: PathBuf,
  pub output: PathBuf,
  pub flags: Vec<String>,
  pub standard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
  pub target: String,
  pub kind: TargetKind,
  pub objects: Vec<PathBuf>,
  /// Artifacts of the target's dependencies, dependents first.
  pub dependency_artifacts: Vec<PathBuf>,
  pub link_flags: Vec<String>,
  pub output: PathBuf,
}

/// Result of one tool invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
  /// Process exit code; `None` if the process was terminated by a signal.
  pub exit_code: Option<i32>,
  /// Captured stderr followed by stdout.
  pub diagnostics: String,
  pub artifact: PathBuf,
  /// Files read besides the main input, as reported by the tool.
  pub dependencies: Vec<PathBuf>,
}

impl ToolOutput {
  pub fn success(&self) -> bool {
    self.exit_code == Some(0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
  /// The tool could not be started (e.g. binary not found).
  #[error("failed to run {program}: {message}")]
  Unavailable { program: String, message: String },

  /// Preparing the output location failed.
  #[error("failed to prepare {}: {message}", path.display())]
  Io { path: PathBuf, message: String },
}

pub trait Toolchain: Send + Sync {
  fn compile(&self, request: &CompileRequest) -> Result<ToolOutput, ToolError>;

  fn build_header(&self, request: &HeaderRequest) -> Result<ToolOutput, ToolError>;

  fn link(&self, request: &LinkRequest) -> Result<ToolOutput, ToolError>;

  /// The argument vector `compile` would run, for compilation databases.
  fn compile_command(&self, request: &CompileRequest) -> Vec<String>;
}

/// How a compiler driver is handed a precompiled header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PchStyle {
  /// `-include <header>`: GCC uses `<header>.gch` when it sits next to the
  /// named header and was built with compatible flags.
  Gcc,
  /// `-include-pch <artifact>`: clang never looks for `.gch` files on its own.
  Clang,
}

impl PchStyle {
  /// Guess the style from the driver's file name.
  ///
  /// Any name containing `clang` is clang. On macOS the generic `c++` and `cc`
  /// drivers are Apple clang as well. Everything else is treated as GCC.
  pub fn for_driver(program: &str) -> Self {
    let name = Path::new(program)
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or(program);
    if name.contains("clang") || (cfg!(target_os = "macos") && matches!(name, "c++" | "cc")) {
      PchStyle::Clang
    } else {
      PchStyle::Gcc
    }
  }
}

/// Toolchain for GCC-compatible compiler drivers.
///
/// The precompiled header flag depends on the driver, see [`PchStyle`]. Set
/// `pch_style` when the driver name does not tell, e.g. a `c++` wrapper
/// around clang on Linux.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GccToolchain {
  /// Compiler driver used for compiling, precompiling headers and linking executables.
  pub cxx: String,
  /// Archiver used for static libraries.
  pub ar: String,
  /// Overrides the style guessed from `cxx`.
  pub pch_style: Option<PchStyle>,
}

impl Default for GccToolchain {
  fn default() -> Self {
    Self {
      cxx: std::env::var("CXX").unwrap_or_else(|_| "c++".to_string()),
      ar: std::env::var("AR").unwrap_or_else(|_| "ar".to_string()),
      pch_style: None,
    }
  }
}

impl GccToolchain {
  pub fn new(cxx: impl Into<String>, ar: impl Into<String>) -> Self {
    Self {
      cxx: cxx.into(),
      ar: ar.into(),
      pch_style: None,
    }
  }

  pub fn with_pch_style(mut self, style: PchStyle) -> Self {
    self.pch_style = Some(style);
    self
  }

  pub fn pch_style(&self) -> PchStyle {
    self.pch_style.unwrap_or_else(|| PchStyle::for_driver(&self.cxx))
  }

  fn header_command(&self, request: &HeaderRequest) -> Vec<String> {
    let mut argv = vec![self.cxx.clone()];
    argv.extend(request.flags.iter().cloned());
    argv.extend(standard_flag(request.standard.as_deref()));
    argv.push("-x".to_string());
    argv.push("c++-header".to_string());
    argv.push(request.header.display().to_string());
    argv.push("-o".to_string());
    argv.push(request.output.display().to_string());
    argv
  }

  fn link_command(&self, request: &LinkRequest) -> Vec<String> {
    let mut argv = Vec::new();
    match request.kind {
      TargetKind::Library => {
        argv.push(self.ar.clone());
        argv.push("rcs".to_string());
        argv.push(request.output.display().to_string());
        argv.extend(request.objects.iter().map(|p| p.display().to_string()));
      }
      TargetKind::Executable => {
        argv.push(self.cxx.clone());
        argv.extend(request.objects.iter().map(|p| p.display().to_string()));
        argv.extend(request.dependency_artifacts.iter().map(|p| p.display().to_string()));
        argv.extend(request.link_flags.iter().cloned());
        argv.push("-o".to_string());
        argv.push(request.output.display().to_string());
      }
    }
    argv
  }
}

impl Toolchain for GccToolchain {
  fn compile(&self, request: &CompileRequest) -> Result<ToolOutput, ToolError> {
    let mut output = run_tool(self.compile_command(request), &request.output)?;
    if output.success() {
      output.dependencies = read_depfile(&depfile_path(&request.output), &request.source);
    }
    Ok(output)
  }

  fn build_header(&self, request: &HeaderRequest) -> Result<ToolOutput, ToolError> {
    run_tool(self.header_command(request), &request.output)
  }

  fn link(&self, request: &LinkRequest) -> Result<ToolOutput, ToolError> {
    if request.kind == TargetKind::Library && request.output.exists() {
      // `ar rcs` appends to an existing archive, so start from scratch
      std::fs::remove_file(&request.output).map_err(|e| ToolError::Io {
        path: request.output.clone(),
        message: e.to_string(),
      })?;
    }
    run_tool(self.link_command(request), &request.output)
  }

  fn compile_command(&self, request: &CompileRequest) -> Vec<String> {
    let mut argv = vec![self.cxx.clone()];
    argv.extend(request.flags.iter().cloned());
    argv.extend(standard_flag(request.standard.as_deref()));
    if let Some(pch) = &request.precompiled_header {
      match self.pch_style() {
        PchStyle::Gcc => {
          // `<name>` is never read when `<name>.gch` is usable
          argv.push("-include".to_string());
          argv.push(pch.artifact.with_extension("").display().to_string());
        }
        PchStyle::Clang => {
          argv.push("-include-pch".to_string());
          argv.push(pch.artifact.display().to_string());
        }
      }
    }
    argv.push("-MMD".to_string());
    argv.push("-MF".to_string());
    argv.push(depfile_path(&request.output).display().to_string());
    argv.push("-c".to_string());
    argv.push(request.source.display().to_string());
    argv.push("-o".to_string());
    argv.push(request.output.display().to_string());
    argv
  }
}

/// Render a language standard tag as a compiler flag.
///
/// Bare versions (`"20"`) mean C++ (`-std=c++20`); anything else is passed through (`"gnu11"`).
pub fn standard_flag(standard: Option<&str>) -> Option<String> {
  let standard = standard?.trim();
  if standard.is_empty() {
    return None;
  }
  if standard.chars().all(|c| c.is_ascii_digit()) {
    Some(format!("-std=c++{}", standard))
  } else {
    Some(format!("-std={}", standard))
  }
}

/// Depfile written next to `object`.
pub fn depfile_path(object: &Path) -> PathBuf {
  let mut path = object.as_os_str().to_os_string();
  path.push(".d");
  PathBuf::from(path)
}

/// Prerequisites listed in a make-style depfile, in order and without duplicates.
///
/// Continuation lines and escaped spaces are understood. A drive letter in the
/// rule target (`C:\obj\a.o: ...`) is not taken for the rule separator.
pub fn parse_depfile(content: &str) -> Vec<PathBuf> {
  let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
  let mut paths: Vec<PathBuf> = Vec::new();

  for rule in joined.lines() {
    let Some(prerequisites) = rule_prerequisites(rule) else {
      continue;
    };
    let mut current = String::new();
    let mut chars = prerequisites.chars().peekable();
    loop {
      let next = chars.next();
      match next {
        Some('\\') if chars.peek() == Some(&' ') => {
          current.push(' ');
          chars.next();
        }
        Some(c) if !c.is_whitespace() => current.push(c),
        _ => {
          if !current.is_empty() {
            let path = PathBuf::from(std::mem::take(&mut current));
            if !paths.contains(&path) {
              paths.push(path);
            }
          }
          if next.is_none() {
            break;
          }
        }
      }
    }
  }
  paths
}

/// Text after the first `:` that ends a rule target.
fn rule_prerequisites(rule: &str) -> Option<&str> {
  let bytes = rule.as_bytes();
  let colon = (0..bytes.len()).find(|&i| bytes[i] == b':' && bytes.get(i + 1).is_none_or(|b| b.is_ascii_whitespace()))?;
  Some(&rule[colon + 1..])
}

fn read_depfile(path: &Path, source: &Path) -> Vec<PathBuf> {
  match std::fs::read_to_string(path) {
    Ok(content) => parse_depfile(&content).into_iter().filter(|p| p != source).collect(),
    Err(e) => {
      debug!(path = %path.display(), error = %e, "no depfile");
      Vec::new()
    }
  }
}

fn run_tool(argv: Vec<String>, output: &Path) -> Result<ToolOutput, ToolError> {
  if let Some(parent) = output.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|e| ToolError::Io {
      path: parent.to_path_buf(),
      message: e.to_string(),
    })?;
  }

  let Some((program, args)) = argv.split_first() else {
    return Err(ToolError::Unavailable {
      program: String::new(),
      message: "empty command".to_string(),
    });
  };

  debug!(program = %program, args = ?args, "spawning tool");

  let result = Command::new(program).args(args).output().map_err(|e| ToolError::Unavailable {
    program: program.clone(),
    message: e.to_string(),
  })?;

  let mut diagnostics = String::from_utf8_lossy(&result.stderr).to_string();
  let stdout = String::from_utf8_lossy(&result.stdout);
  if !stdout.trim().is_empty() {
    if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
      diagnostics.push('\n');
    }
    diagnostics.push_str(&stdout);
  }

  Ok(ToolOutput {
    exit_code: result.status.code(),
    diagnostics,
    artifact: output.to_path_buf(),
    dependencies: Vec::new(),
  })
}
