//! Building a single target.
//!
//! A target task plans against its previous cache entry, then runs the stale
//! steps: precompiled header first, then all stale compilation units in
//! parallel, then the link. Every tool invocation holds a permit of the shared
//! job semaphore and runs on the blocking pool.
//!
//! The task never touches the cache itself. It returns the entry that should
//! replace the previous one, containing only steps that are known good. A
//! compiled unit is recorded together with the fingerprints of the headers the
//! compiler reported reading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::TargetRecord;
use crate::fs::{Fingerprint, SourceFs};
use crate::package::PackageError;
use crate::plan::{PlanInputs, TargetPlan, plan_target};
use crate::report::{FailureReason, SkipReason, TargetOutcome, TargetReport, UnitReport, UnitStatus};
use crate::target::TargetDescriptor;
use crate::toolchain::{ToolError, ToolOutput, Toolchain};

use super::types::Toolset;

pub(crate) struct TargetJob {
  pub target: TargetDescriptor,
  /// Plan inputs, or the reason packages could not be resolved.
  pub inputs: Result<PlanInputs, PackageError>,
  pub previous: Option<TargetRecord>,
  pub tools: Toolset,
  pub build_dir: PathBuf,
  pub semaphore: Arc<Semaphore>,
  pub cancel: CancellationToken,
}

pub(crate) struct TargetRun {
  pub report: TargetReport,
  /// Replacement cache entry; `None` leaves the previous entry untouched.
  pub record: Option<TargetRecord>,
}

/// Runs one tool invocation under a job permit.
#[derive(Clone)]
struct StepRunner {
  toolchain: Arc<dyn Toolchain>,
  semaphore: Arc<Semaphore>,
  cancel: CancellationToken,
}

impl StepRunner {
  /// Run `step` and report it, along with the files the tool said it read.
  async fn run<F>(self, path: PathBuf, step: F) -> (UnitReport, Vec<PathBuf>)
  where
    F: FnOnce(&dyn Toolchain) -> Result<ToolOutput, ToolError> + Send + 'static,
  {
    let Ok(_permit) = self.semaphore.acquire_owned().await else {
      return (UnitReport::cancelled(path), Vec::new());
    };
    // Jobs still queued for a permit when the build is cancelled never start
    if self.cancel.is_cancelled() {
      return (UnitReport::cancelled(path), Vec::new());
    }

    let started = Instant::now();
    let toolchain = self.toolchain;
    let result = tokio::task::spawn_blocking(move || step(toolchain.as_ref())).await;
    let duration = started.elapsed();

    let (status, exit_code, diagnostics, dependencies) = match result {
      Ok(Ok(output)) if output.success() => (
        UnitStatus::Succeeded,
        output.exit_code,
        output.diagnostics,
        output.dependencies,
      ),
      Ok(Ok(output)) => (UnitStatus::Failed, output.exit_code, output.diagnostics, Vec::new()),
      Ok(Err(e)) => (UnitStatus::Failed, None, e.to_string(), Vec::new()),
      Err(e) => (UnitStatus::Failed, None, format!("tool task failed: {}", e), Vec::new()),
    };

    if status == UnitStatus::Failed {
      warn!(path = %path.display(), exit_code = ?exit_code, "tool invocation failed");
    } else {
      debug!(path = %path.display(), duration_ms = duration.as_millis() as u64, "tool invocation finished");
    }

    let report = UnitReport {
      path,
      status,
      exit_code,
      diagnostics,
      duration,
    };
    (report, dependencies)
  }
}

pub(crate) async fn run_target(job: TargetJob) -> TargetRun {
  let started = Instant::now();
  let mut run = build_target(job).await;
  run.report.duration = started.elapsed();

  match &run.report.outcome {
    TargetOutcome::Failed(reason) => error!(target = %run.report.name, reason = %reason, "target failed"),
    outcome => info!(target = %run.report.name, outcome = %outcome, "target finished"),
  }
  run
}

async fn build_target(job: TargetJob) -> TargetRun {
  let mut report = TargetReport::new(&job.target.name, job.target.kind, TargetOutcome::Success);

  let inputs = match job.inputs {
    Ok(inputs) => inputs,
    Err(e) => {
      report.outcome = TargetOutcome::Failed(FailureReason::Packages(e.to_string()));
      return TargetRun { report, record: None };
    }
  };

  let planned = {
    let target = job.target.clone();
    let previous = job.previous.clone();
    let fs = job.tools.fs.clone();
    let build_dir = job.build_dir.clone();
    tokio::task::spawn_blocking(move || plan_target(&target, &inputs, previous.as_ref(), fs.as_ref(), &build_dir))
      .await
  };
  let plan = match planned {
    Ok(Ok(plan)) => plan,
    Ok(Err(e)) => {
      report.outcome = TargetOutcome::Failed(FailureReason::Sources(e.to_string()));
      return TargetRun { report, record: None };
    }
    Err(e) => {
      report.outcome = TargetOutcome::Failed(FailureReason::Internal(e.to_string()));
      return TargetRun { report, record: None };
    }
  };

  report.reused_units = plan.units.len() - plan.stale_units().count();

  if plan.is_up_to_date() {
    report.outcome = TargetOutcome::Skipped(SkipReason::UpToDate);
    report.artifact = plan.artifact().map(Path::to_path_buf);
    return TargetRun {
      report,
      record: Some(plan.fresh_record()),
    };
  }

  let runner = StepRunner {
    toolchain: job.tools.toolchain.clone(),
    semaphore: job.semaphore.clone(),
    cancel: job.cancel.clone(),
  };
  let mut record = plan.fresh_record();

  if let Some(header) = &plan.header
    && header.stale.is_some()
    && let Some(request) = plan.header_request()
  {
    debug!(target = %plan.target, header = %header.header.display(), reason = ?header.stale, "precompiling header");
    let (unit, _) = runner
      .clone()
      .run(header.header.clone(), move |tc| tc.build_header(&request))
      .await;
    let status = unit.status;
    report.header = Some(unit);

    match status {
      UnitStatus::Succeeded => record.header = plan.header_record(),
      UnitStatus::Failed => {
        report.outcome = TargetOutcome::Failed(FailureReason::PrecompiledHeader);
        return TargetRun {
          report,
          record: Some(record),
        };
      }
      UnitStatus::Cancelled => {
        report.outcome = TargetOutcome::Skipped(SkipReason::Cancelled);
        return TargetRun {
          report,
          record: Some(record),
        };
      }
    }
  }

  let (units, failed, cancelled) = compile_units(&plan, &runner, &job.tools.fs, &job.build_dir, &mut record).await;
  report.units = units;

  if failed > 0 {
    report.outcome = TargetOutcome::Failed(FailureReason::Compile { failed });
    return TargetRun {
      report,
      record: Some(record),
    };
  }
  if cancelled > 0 || job.cancel.is_cancelled() {
    report.outcome = TargetOutcome::Skipped(SkipReason::Cancelled);
    return TargetRun {
      report,
      record: Some(record),
    };
  }

  let Some(request) = plan.link_request() else {
    debug!(target = %plan.target, "header-only library, nothing to link");
    return TargetRun {
      report,
      record: Some(record),
    };
  };

  let reason = plan.link.as_ref().and_then(|l| l.stale);
  debug!(target = %plan.target, output = %request.output.display(), reason = ?reason, "linking");
  let output = request.output.clone();
  let (link, _) = runner.run(output.clone(), move |tc| tc.link(&request)).await;
  let status = link.status;
  report.link = Some(link);

  report.outcome = match status {
    UnitStatus::Succeeded => {
      record.link = plan.link_record();
      report.artifact = Some(output);
      TargetOutcome::Success
    }
    UnitStatus::Failed => TargetOutcome::Failed(FailureReason::Link),
    UnitStatus::Cancelled => TargetOutcome::Skipped(SkipReason::Cancelled),
  };

  TargetRun {
    report,
    record: Some(record),
  }
}

/// Compile every stale unit, recording each success in `record`.
///
/// Returns the unit reports in source order with the failed and cancelled counts.
async fn compile_units(
  plan: &TargetPlan,
  runner: &StepRunner,
  fs: &Arc<dyn SourceFs>,
  build_dir: &Path,
  record: &mut TargetRecord,
) -> (Vec<UnitReport>, usize, usize) {
  let mut join_set = JoinSet::new();

  for (index, unit) in plan.units.iter().enumerate() {
    if !unit.is_stale() {
      continue;
    }
    debug!(target = %plan.target, source = %unit.source.display(), reason = ?unit.stale, "compiling");
    let request = plan.compile_request(unit);
    let runner = runner.clone();
    let source = unit.source.clone();
    let fs = fs.clone();
    let build_dir = build_dir.to_path_buf();
    join_set.spawn(async move {
      let (report, dependencies) = runner.run(source, move |tc| tc.compile(&request)).await;
      let includes = if report.status == UnitStatus::Succeeded {
        tokio::task::spawn_blocking(move || fingerprint_includes(fs.as_ref(), &build_dir, &dependencies))
          .await
          .ok()
          .flatten()
      } else {
        None
      };
      (index, report, includes)
    });
  }

  let mut results = Vec::with_capacity(join_set.len());
  let mut failed = 0;
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(result) => results.push(result),
      Err(e) => {
        error!(target = %plan.target, error = %e, "compile task panicked");
        failed += 1;
      }
    }
  }
  results.sort_by_key(|(index, _, _)| *index);

  let mut cancelled = 0;
  let mut reports = Vec::with_capacity(results.len());
  for (index, unit_report, includes) in results {
    match unit_report.status {
      UnitStatus::Succeeded => {
        let unit = &plan.units[index];
        match includes {
          Some(includes) => {
            record
              .units
              .insert(unit.source.clone(), plan.compiled_unit_record(unit, includes));
          }
          // Left unrecorded so the next build compiles it again
          None => warn!(source = %unit.source.display(), "cannot fingerprint included headers"),
        }
      }
      UnitStatus::Failed => failed += 1,
      UnitStatus::Cancelled => cancelled += 1,
    }
    reports.push(unit_report);
  }

  (reports, failed, cancelled)
}

/// Fingerprint the headers a compile read.
///
/// Files under `build_dir` (the precompiled header) are tracked by their own
/// records. Returns `None` if any header cannot be read.
fn fingerprint_includes(
  fs: &dyn SourceFs,
  build_dir: &Path,
  dependencies: &[PathBuf],
) -> Option<BTreeMap<PathBuf, Fingerprint>> {
  let mut includes = BTreeMap::new();
  for header in dependencies.iter().filter(|p| !p.starts_with(build_dir)) {
    match fs.read_fingerprint(header) {
      Ok(fingerprint) => {
        includes.insert(header.clone(), fingerprint);
      }
      Err(e) => {
        debug!(header = %header.display(), error = %e, "included header unreadable");
        return None;
      }
    }
  }
  Some(includes)
}
