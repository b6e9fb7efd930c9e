//! Build reports.
//!
//! A [`BuildReport`] has one [`TargetReport`] per target, in build order,
//! including targets that were skipped. Every failing tool invocation keeps its
//! exit code and full diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::target::TargetKind;

/// Why a target was not built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// Nothing changed since the last successful build.
  UpToDate,
  /// A dependency failed or was skipped for a reason other than being up to date.
  DependencyFailed(String),
  /// The build was cancelled before the target completed.
  Cancelled,
}

/// Why a target failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
  #[error("package resolution failed: {0}")]
  Packages(String),

  #[error("failed to plan sources: {0}")]
  Sources(String),

  #[error("precompiled header failed")]
  PrecompiledHeader,

  #[error("{failed} compilation unit(s) failed")]
  Compile { failed: usize },

  #[error("link failed")]
  Link,

  #[error("internal error: {0}")]
  Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TargetOutcome {
  Success,
  Failed(FailureReason),
  Skipped(SkipReason),
}

impl TargetOutcome {
  /// Whether dependents may build on top of this target.
  pub fn is_satisfied(&self) -> bool {
    matches!(self, TargetOutcome::Success | TargetOutcome::Skipped(SkipReason::UpToDate))
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, TargetOutcome::Failed(_))
  }
}

impl std::fmt::Display for TargetOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TargetOutcome::Success => write!(f, "built"),
      TargetOutcome::Failed(reason) => write!(f, "failed: {}", reason),
      TargetOutcome::Skipped(SkipReason::UpToDate) => write!(f, "up to date"),
      TargetOutcome::Skipped(SkipReason::DependencyFailed(dep)) => write!(f, "skipped: dependency {} failed", dep),
      TargetOutcome::Skipped(SkipReason::Cancelled) => write!(f, "cancelled"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
  Succeeded,
  Failed,
  /// Not started because the build was cancelled.
  Cancelled,
}

/// One tool invocation (compile, precompiled header or link).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
  /// Source file, header, or link output.
  pub path: PathBuf,
  pub status: UnitStatus,
  pub exit_code: Option<i32>,
  pub diagnostics: String,
  pub duration: Duration,
}

impl UnitReport {
  pub fn cancelled(path: PathBuf) -> Self {
    Self {
      path,
      status: UnitStatus::Cancelled,
      exit_code: None,
      diagnostics: String::new(),
      duration: Duration::ZERO,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
  pub name: String,
  pub kind: TargetKind,
  pub outcome: TargetOutcome,
  pub duration: Duration,
  /// The linked artifact, when the target produced one or was up to date.
  /// Header-only libraries have none.
  pub artifact: Option<PathBuf>,
  pub header: Option<UnitReport>,
  /// Compile invocations, in source order.
  pub units: Vec<UnitReport>,
  /// Units whose recorded objects were reused.
  pub reused_units: usize,
  pub link: Option<UnitReport>,
}

impl TargetReport {
  pub fn new(name: impl Into<String>, kind: TargetKind, outcome: TargetOutcome) -> Self {
    Self {
      name: name.into(),
      kind,
      outcome,
      duration: Duration::ZERO,
      artifact: None,
      header: None,
      units: Vec::new(),
      reused_units: 0,
      link: None,
    }
  }

  /// Every failed invocation of this target.
  pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
    self
      .header
      .iter()
      .chain(self.units.iter())
      .chain(self.link.iter())
      .filter(|u| u.status == UnitStatus::Failed)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
  pub targets: Vec<TargetReport>,
  pub duration: Duration,
  pub cancelled: bool,
}

impl BuildReport {
  /// True when every target built or was already up to date.
  ///
  /// A cancellation that arrives after the last target finished leaves every
  /// outcome satisfied, so it does not fail the build.
  pub fn is_success(&self) -> bool {
    self.targets.iter().all(|t| t.outcome.is_satisfied())
  }

  pub fn exit_code(&self) -> i32 {
    if self.is_success() { 0 } else { 1 }
  }

  pub fn target(&self, name: &str) -> Option<&TargetReport> {
    self.targets.iter().find(|t| t.name == name)
  }

  pub fn outcome(&self, name: &str) -> Option<&TargetOutcome> {
    self.target(name).map(|t| &t.outcome)
  }

  pub fn built(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| t.outcome == TargetOutcome::Success)
  }

  pub fn up_to_date(&self) -> impl Iterator<Item = &TargetReport> {
    self
      .targets
      .iter()
      .filter(|t| t.outcome == TargetOutcome::Skipped(SkipReason::UpToDate))
  }

  pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| t.outcome.is_failure())
  }

  /// Targets skipped for a reason other than being up to date.
  pub fn skipped(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| {
      matches!(
        t.outcome,
        TargetOutcome::Skipped(SkipReason::DependencyFailed(_) | SkipReason::Cancelled)
      )
    })
  }

  /// Number of compile invocations across all targets.
  pub fn compiled_units(&self) -> usize {
    self.targets.iter().map(|t| t.units.len()).sum()
  }
}
