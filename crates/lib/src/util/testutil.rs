//! Test utilities for mei-lib.
//!
//! In-memory collaborators so planner and executor tests run without a compiler
//! or a real source tree.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::fs::{Fingerprint, FsError, SourceFs, is_source_file};
use crate::toolchain::{CompileRequest, HeaderRequest, LinkRequest, ToolError, ToolOutput, Toolchain};
use crate::util::hash::hash_bytes;

/// A [`SourceFs`] holding files in memory.
///
/// A directory exists if it was created with [`MemoryFs::mkdir`] or contains a file.
#[derive(Debug, Default)]
pub struct MemoryFs {
  files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
  dirs: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn write(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
    self
      .files
      .lock()
      .unwrap()
      .insert(path.as_ref().to_path_buf(), content.as_ref().to_vec());
  }

  pub fn remove(&self, path: impl AsRef<Path>) {
    self.files.lock().unwrap().remove(path.as_ref());
  }

  pub fn mkdir(&self, path: impl AsRef<Path>) {
    self.dirs.lock().unwrap().insert(path.as_ref().to_path_buf());
  }

  pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
    self.files.lock().unwrap().get(path.as_ref()).cloned()
  }
}

impl SourceFs for MemoryFs {
  fn list_source_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
    let files = self.files.lock().unwrap();
    let under: Vec<PathBuf> = files.keys().filter(|p| p.starts_with(dir)).cloned().collect();
    if under.is_empty() && !self.dirs.lock().unwrap().contains(dir) {
      return Err(FsError::NotFound(dir.to_path_buf()));
    }
    Ok(under.into_iter().filter(|p| is_source_file(p)).collect())
  }

  fn read_fingerprint(&self, path: &Path) -> Result<Fingerprint, FsError> {
    self
      .files
      .lock()
      .unwrap()
      .get(path)
      .map(|content| Fingerprint(hash_bytes(content).0))
      .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
  }

  fn exists(&self, path: &Path) -> bool {
    self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains(path)
  }
}

/// A tool invocation seen by [`FakeToolchain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
  Compile(PathBuf),
  Header(PathBuf),
  Link(String),
}

/// A [`Toolchain`] that records calls and writes artifacts into a [`MemoryFs`].
///
/// Artifacts embed their inputs' content, so recompiling a changed source
/// produces a different object and relinking a changed library produces a
/// different archive. Compiles follow `#include "..."` lines relative to the
/// including file and report every header found in the [`MemoryFs`].
#[derive(Debug)]
pub struct FakeToolchain {
  fs: Arc<MemoryFs>,
  calls: Mutex<Vec<ToolCall>>,
  link_requests: Mutex<Vec<LinkRequest>>,
  failing_sources: Mutex<HashSet<PathBuf>>,
  failing_links: Mutex<HashSet<String>>,
  failing_headers: Mutex<bool>,
  delay: Option<Duration>,
  cancel_after: Mutex<Option<(usize, CancellationToken)>>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl FakeToolchain {
  pub fn new(fs: Arc<MemoryFs>) -> Self {
    Self {
      fs,
      calls: Mutex::new(Vec::new()),
      link_requests: Mutex::new(Vec::new()),
      failing_sources: Mutex::new(HashSet::new()),
      failing_links: Mutex::new(HashSet::new()),
      failing_headers: Mutex::new(false),
      delay: None,
      cancel_after: Mutex::new(None),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
    }
  }

  /// Make every tool call sleep, so parallel calls overlap.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn fail_source(&self, source: impl Into<PathBuf>) {
    self.failing_sources.lock().unwrap().insert(source.into());
  }

  pub fn fail_link(&self, target: impl Into<String>) {
    self.failing_links.lock().unwrap().insert(target.into());
  }

  pub fn fail_headers(&self) {
    *self.failing_headers.lock().unwrap() = true;
  }

  pub fn clear_failures(&self) {
    self.failing_sources.lock().unwrap().clear();
    self.failing_links.lock().unwrap().clear();
    *self.failing_headers.lock().unwrap() = false;
  }

  /// Cancel `token` once `count` compile calls have started.
  pub fn cancel_after_compiles(&self, count: usize, token: CancellationToken) {
    *self.cancel_after.lock().unwrap() = Some((count, token));
  }

  pub fn calls(&self) -> Vec<ToolCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn take_calls(&self) -> Vec<ToolCall> {
    std::mem::take(&mut *self.calls.lock().unwrap())
  }

  pub fn compiled(&self) -> Vec<PathBuf> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        ToolCall::Compile(source) => Some(source),
        _ => None,
      })
      .collect()
  }

  pub fn linked(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        ToolCall::Link(target) => Some(target),
        _ => None,
      })
      .collect()
  }

  /// The last link request seen for `target`.
  pub fn link_request(&self, target: &str) -> Option<LinkRequest> {
    self
      .link_requests
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|r| r.target == target)
      .cloned()
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  fn begin(&self, call: ToolCall) {
    let mut calls = self.calls.lock().unwrap();
    calls.push(call);
    let compiles = calls.iter().filter(|c| matches!(c, ToolCall::Compile(_))).count();
    drop(calls);

    if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref()
      && compiles >= *count
    {
      token.cancel();
    }

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      std::thread::sleep(delay);
    }
  }

  /// Quoted includes reachable from `source`, depth first.
  fn includes(&self, source: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(file) = pending.pop() {
      let content = String::from_utf8(self.fs.read(&file).unwrap_or_default()).unwrap_or_default();
      let dir = file.parent().unwrap_or(Path::new(""));
      for line in content.lines() {
        let Some(name) = line
          .trim()
          .strip_prefix("#include \"")
          .and_then(|rest| rest.strip_suffix('"'))
        else {
          continue;
        };
        let header = dir.join(name);
        if self.fs.read(&header).is_some() && !found.contains(&header) {
          found.push(header.clone());
          pending.push(header);
        }
      }
    }
    found
  }

  fn finish(&self, ok: bool, artifact: &Path, content: Vec<u8>) -> ToolOutput {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    if ok {
      self.fs.write(artifact, content);
      ToolOutput {
        exit_code: Some(0),
        diagnostics: String::new(),
        artifact: artifact.to_path_buf(),
        dependencies: Vec::new(),
      }
    } else {
      ToolOutput {
        exit_code: Some(1),
        diagnostics: format!("error: cannot build {}", artifact.display()),
        artifact: artifact.to_path_buf(),
        dependencies: Vec::new(),
      }
    }
  }
}

impl Toolchain for FakeToolchain {
  fn compile(&self, request: &CompileRequest) -> Result<ToolOutput, ToolError> {
    self.begin(ToolCall::Compile(request.source.clone()));
    let ok = !self.failing_sources.lock().unwrap().contains(&request.source);
    let includes = self.includes(&request.source);
    let mut content = self.fs.read(&request.source).unwrap_or_default();
    for header in &includes {
      content.extend(self.fs.read(header).unwrap_or_default());
    }
    content.extend(request.flags.join(" ").into_bytes());
    let mut output = self.finish(ok, &request.output, content);
    if output.success() {
      output.dependencies = includes;
    }
    Ok(output)
  }

  fn build_header(&self, request: &HeaderRequest) -> Result<ToolOutput, ToolError> {
    self.begin(ToolCall::Header(request.header.clone()));
    let ok = !*self.failing_headers.lock().unwrap();
    let content = self.fs.read(&request.header).unwrap_or_default();
    Ok(self.finish(ok, &request.output, content))
  }

  fn link(&self, request: &LinkRequest) -> Result<ToolOutput, ToolError> {
    self.begin(ToolCall::Link(request.target.clone()));
    self.link_requests.lock().unwrap().push(request.clone());
    let ok = !self.failing_links.lock().unwrap().contains(&request.target);
    let mut content = Vec::new();
    for input in request.objects.iter().chain(request.dependency_artifacts.iter()) {
      content.extend(self.fs.read(input).unwrap_or_default());
    }
    Ok(self.finish(ok, &request.output, content))
  }

  fn compile_command(&self, request: &CompileRequest) -> Vec<String> {
    let mut argv = vec!["fake-cc".to_string()];
    argv.extend(request.flags.iter().cloned());
    argv.push("-c".to_string());
    argv.push(request.source.display().to_string());
    argv
  }
}
