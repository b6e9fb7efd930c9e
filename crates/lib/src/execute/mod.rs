//! Build execution.
//!
//! This module provides the entry point for building a finalized target graph.
//! It handles:
//! - Package resolution before any tool runs
//! - Dependency-driven scheduling: a target starts as soon as all of its
//!   dependencies finished, not when a whole wave finished
//! - A global bound on concurrent tool invocations
//! - Failure propagation and skip tracking
//! - Cooperative cancellation
//! - Persisting the fingerprint cache

mod target;
mod types;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::FingerprintCache;
use crate::config::BuildConfig;
use crate::graph::{BuildGraph, ConfigError};
use crate::package::{PackageError, PackageFlags, resolve_packages};
use crate::plan::PlanInputs;
use crate::report::{BuildReport, FailureReason, SkipReason, TargetOutcome, TargetReport};
use crate::target::TargetKind;

use target::{TargetJob, TargetRun, run_target};

pub use types::{BuildError, Toolset};

/// Packages of every target, resolved up front.
pub(crate) struct ResolvedPackages {
  pub resolved: HashMap<String, Vec<PackageFlags>>,
  /// Targets whose resolver could not run; only these targets fail.
  pub unavailable: HashMap<String, PackageError>,
}

/// Resolve the packages of every target in build order.
///
/// An unknown package is a configuration error and aborts before any tool runs.
pub(crate) async fn resolve_graph_packages(graph: &BuildGraph, tools: &Toolset) -> Result<ResolvedPackages, BuildError> {
  let resolver = tools.packages.clone();
  let targets: Vec<(String, Vec<String>)> = graph.order().map(|t| (t.name.clone(), t.packages.clone())).collect();

  let packages = tokio::task::spawn_blocking(move || {
    let mut packages = ResolvedPackages {
      resolved: HashMap::new(),
      unavailable: HashMap::new(),
    };
    for (name, target_packages) in targets {
      match resolve_packages(resolver.as_ref(), &target_packages) {
        Ok(flags) => {
          packages.resolved.insert(name, flags);
        }
        Err(PackageError::Unknown { package, message }) => {
          return Err(ConfigError::UnknownPackage {
            target: name,
            package,
            message,
          });
        }
        Err(e) => {
          warn!(target = %name, error = %e, "package resolution unavailable");
          packages.unavailable.insert(name, e);
        }
      }
    }
    Ok(packages)
  })
  .await??;

  Ok(packages)
}

/// Build every target in the graph.
///
/// Targets run as soon as their dependencies succeeded or were up to date.
/// A failed target skips all of its transitive dependents while unrelated
/// targets keep building. Cancelling `cancel` stops scheduling new work; tool
/// invocations already running finish and their results are kept.
///
/// # Returns
///
/// A [`BuildReport`] with one entry per target in build order. Only
/// configuration errors (an unknown package) are returned as `Err`.
pub async fn build(
  graph: &BuildGraph,
  tools: &Toolset,
  config: &BuildConfig,
  cancel: CancellationToken,
) -> Result<BuildReport, BuildError> {
  let started = Instant::now();
  info!(
    targets = graph.len(),
    jobs = config.jobs,
    build_dir = %config.build_dir.display(),
    "starting build"
  );

  let mut packages = resolve_graph_packages(graph, tools).await?;
  let mut cache = FingerprintCache::load(&config.cache_path);
  let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));

  let mut outcomes: HashMap<String, TargetOutcome> = HashMap::new();
  let mut reports: HashMap<String, TargetReport> = HashMap::new();
  // Artifacts of finished targets; header-only libraries have none
  let mut artifacts: HashMap<String, PathBuf> = HashMap::new();
  let mut dispatched: HashSet<String> = HashSet::new();
  let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
  let mut join_set: JoinSet<TargetRun> = JoinSet::new();
  let mut cancel_seen = false;

  loop {
    // Order matters: a skip settles before its dependents are visited
    for target in graph.order() {
      if outcomes.contains_key(&target.name) || dispatched.contains(&target.name) {
        continue;
      }

      let skip = if cancel.is_cancelled() {
        Some(SkipReason::Cancelled)
      } else {
        graph
          .dependencies(&target.name)
          .into_iter()
          .find(|dep| outcomes.get(*dep).is_some_and(|o| !o.is_satisfied()))
          .map(|dep| SkipReason::DependencyFailed(dep.to_string()))
      };

      if let Some(reason) = skip {
        info!(target = %target.name, reason = ?reason, "skipping target");
        let outcome = TargetOutcome::Skipped(reason);
        outcomes.insert(target.name.clone(), outcome.clone());
        reports.insert(
          target.name.clone(),
          TargetReport::new(&target.name, target.kind, outcome),
        );
        continue;
      }

      let ready = graph
        .dependencies(&target.name)
        .into_iter()
        .all(|dep| outcomes.contains_key(dep));
      if !ready {
        continue;
      }

      let inputs = match packages.unavailable.remove(&target.name) {
        Some(e) => Err(e),
        None => Ok(PlanInputs::for_target(graph, target, &packages.resolved, &artifacts)),
      };

      debug!(target = %target.name, "dispatching target");
      let job = TargetJob {
        target: target.clone(),
        inputs,
        previous: cache.target(&target.name).cloned(),
        tools: tools.clone(),
        build_dir: config.build_dir.clone(),
        semaphore: semaphore.clone(),
        cancel: cancel.clone(),
      };
      let handle = join_set.spawn(run_target(job));
      running.insert(handle.id(), target.name.clone());
      dispatched.insert(target.name.clone());
    }

    if join_set.is_empty() {
      break;
    }

    tokio::select! {
      biased;

      _ = cancel.cancelled(), if !cancel_seen => {
        cancel_seen = true;
        warn!(running = running.len(), "build cancelled, waiting for running jobs");
      }

      joined = join_set.join_next_with_id() => match joined {
        Some(Ok((id, run))) => {
          running.remove(&id);
          let name = run.report.name.clone();
          if let Some(record) = run.record {
            cache.replace_target(&name, record);
          }
          if let Some(artifact) = &run.report.artifact {
            artifacts.insert(name.clone(), artifact.clone());
          }
          outcomes.insert(name.clone(), run.report.outcome.clone());
          reports.insert(name, run.report);
        }
        Some(Err(e)) => {
          let Some(name) = running.remove(&e.id()) else {
            error!(error = %e, "unknown build task failed");
            continue;
          };
          error!(target = %name, error = %e, "build task panicked");
          let kind = graph.target(&name).map(|t| t.kind).unwrap_or(TargetKind::Library);
          let outcome = TargetOutcome::Failed(FailureReason::Internal(e.to_string()));
          outcomes.insert(name.clone(), outcome.clone());
          reports.insert(name.clone(), TargetReport::new(&name, kind, outcome));
        }
        None => break,
      }
    }
  }

  if let Err(e) = cache.save(&config.cache_path) {
    warn!(path = %config.cache_path.display(), error = %e, "failed to save fingerprint cache");
  }

  let targets = graph
    .order()
    .map(|t| {
      reports
        .remove(&t.name)
        .unwrap_or_else(|| TargetReport::new(&t.name, t.kind, TargetOutcome::Skipped(SkipReason::Cancelled)))
    })
    .collect();

  let report = BuildReport {
    targets,
    duration: started.elapsed(),
    cancelled: cancel.is_cancelled(),
  };

  info!(
    built = report.built().count(),
    up_to_date = report.up_to_date().count(),
    failed = report.failed().count(),
    skipped = report.skipped().count(),
    duration_ms = report.duration.as_millis() as u64,
    "build finished"
  );

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::{Path, PathBuf};
  use std::time::Duration;

  use tempfile::TempDir;

  use crate::graph::TargetRegistry;
  use crate::package::{PackageResolver, StaticPackageResolver};
  use crate::report::UnitStatus;
  use crate::target::TargetDescriptor;
  use crate::util::testutil::{FakeToolchain, MemoryFs, ToolCall};

  fn core() -> TargetDescriptor {
    TargetDescriptor::library("core")
      .with_source_directory("src/core")
      .with_include_path("include")
      .with_package("fmt")
      .with_standard("20")
  }

  fn app() -> TargetDescriptor {
    TargetDescriptor::executable("app")
      .with_source_directory("src/app")
      .with_dependency("core")
  }

  fn tools() -> TargetDescriptor {
    TargetDescriptor::executable("tools").with_source_directory("src/tools")
  }

  fn graph(targets: Vec<TargetDescriptor>) -> BuildGraph {
    let mut registry = TargetRegistry::new();
    for target in targets {
      registry.register(target).unwrap();
    }
    registry.finalize().unwrap()
  }

  fn default_graph() -> BuildGraph {
    graph(vec![core(), app(), tools()])
  }

  fn resolver() -> StaticPackageResolver {
    StaticPackageResolver::new().with_package(
      "fmt",
      PackageFlags::new(vec!["-I/opt/fmt/include".to_string()], vec!["-lfmt".to_string()]),
    )
  }

  struct Fixture {
    _temp: TempDir,
    fs: Arc<MemoryFs>,
    toolchain: Arc<FakeToolchain>,
    config: BuildConfig,
  }

  impl Fixture {
    fn new() -> Self {
      Self::with_toolchain(FakeToolchain::new)
    }

    fn with_toolchain(make: impl FnOnce(Arc<MemoryFs>) -> FakeToolchain) -> Self {
      let temp = TempDir::new().unwrap();
      let fs = Arc::new(MemoryFs::new());
      fs.write("src/core/a.cpp", "int a() { return 1; }");
      fs.write("src/core/b.cpp", "int b() { return 2; }");
      fs.write("src/core/pch.hpp", "#include <vector>");
      fs.write("src/app/main.cpp", "int main() {}");
      fs.write("src/tools/gen.cpp", "int main() { return 0; }");

      let toolchain = Arc::new(make(fs.clone()));
      let config = BuildConfig::new(temp.path().join("build")).with_jobs(4);
      Self {
        _temp: temp,
        fs,
        toolchain,
        config,
      }
    }

    fn tools_with(&self, packages: Arc<dyn PackageResolver>) -> Toolset {
      Toolset::new(self.fs.clone(), packages, self.toolchain.clone())
    }

    fn tools(&self) -> Toolset {
      self.tools_with(Arc::new(resolver()))
    }

    async fn build_result(&self, graph: &BuildGraph) -> Result<BuildReport, BuildError> {
      build(graph, &self.tools(), &self.config, CancellationToken::new()).await
    }

    async fn build(&self, graph: &BuildGraph) -> BuildReport {
      self.build_result(graph).await.unwrap()
    }
  }

  fn sorted(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths
  }

  #[tokio::test]
  async fn first_build_compiles_and_links_everything() {
    let fixture = Fixture::new();
    let graph = default_graph();

    let report = fixture.build(&graph).await;

    assert!(report.is_success());
    assert_eq!(report.built().count(), 3);
    assert_eq!(report.compiled_units(), 4);
    assert_eq!(
      report.targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
      vec!["core", "app", "tools"]
    );

    let calls = fixture.toolchain.calls();
    let link_core = calls.iter().position(|c| *c == ToolCall::Link("core".to_string())).unwrap();
    let link_app = calls.iter().position(|c| *c == ToolCall::Link("app".to_string())).unwrap();
    assert!(link_core < link_app);

    let core_artifact = fixture.config.build_dir.join("libcore.a");
    assert_eq!(report.target("core").unwrap().artifact, Some(core_artifact.clone()));
    assert!(fixture.fs.read(&core_artifact).is_some());

    let cache = FingerprintCache::try_load(&fixture.config.cache_path).unwrap();
    assert_eq!(cache.target_names().collect::<Vec<_>>(), vec!["app", "core", "tools"]);
  }

  #[tokio::test]
  async fn second_build_runs_no_tools() {
    let fixture = Fixture::new();
    let graph = default_graph();

    fixture.build(&graph).await;
    fixture.toolchain.take_calls();

    let report = fixture.build(&graph).await;
    assert!(report.is_success());
    assert_eq!(report.up_to_date().count(), 3);
    assert!(fixture.toolchain.calls().is_empty());
    assert_eq!(report.target("core").unwrap().reused_units, 2);
  }

  fn header_only_graph() -> BuildGraph {
    graph(vec![
      TargetDescriptor::library("ryuko")
        .with_source_directory("src/ryuko")
        .with_precompiled_header("src/ryuko/pch.hpp")
        .with_linked_library("stdc++"),
      TargetDescriptor::executable("cli")
        .with_source_directory("cli")
        .with_dependency("ryuko"),
    ])
  }

  #[tokio::test]
  async fn header_only_library_builds_without_archive() {
    let fixture = Fixture::new();
    fixture.fs.write("src/ryuko/pch.hpp", "#include <vector>");
    fixture.fs.write("src/ryuko/ryuko.hpp", "#pragma once");
    fixture.fs.write("cli/main.cpp", "int main() {}");
    let graph = header_only_graph();

    let report = fixture.build(&graph).await;
    assert!(report.is_success(), "{:?}", report.failed().collect::<Vec<_>>());
    let ryuko = report.target("ryuko").unwrap();
    assert_eq!(ryuko.outcome, TargetOutcome::Success);
    assert_eq!(ryuko.artifact, None);
    assert!(ryuko.link.is_none());
    assert_eq!(
      fixture.toolchain.calls(),
      vec![
        ToolCall::Header(PathBuf::from("src/ryuko/pch.hpp")),
        ToolCall::Compile(PathBuf::from("cli/main.cpp")),
        ToolCall::Link("cli".to_string()),
      ]
    );

    let link = fixture.toolchain.link_request("cli").unwrap();
    assert!(link.dependency_artifacts.is_empty());
    assert!(link.link_flags.contains(&"-lstdc++".to_string()));
    assert!(fixture.fs.read(fixture.config.build_dir.join("libryuko.a")).is_none());

    fixture.toolchain.take_calls();
    let report = fixture.build(&graph).await;
    assert!(report.is_success());
    assert_eq!(report.up_to_date().count(), 2);
    assert!(fixture.toolchain.calls().is_empty());
  }

  #[tokio::test]
  async fn included_header_change_recompiles_includers() {
    let fixture = Fixture::new();
    fixture.fs.write("src/app/app.hpp", "#include \"config.hpp\"");
    fixture.fs.write("src/app/config.hpp", "#define LEVEL 1");
    fixture.fs.write("src/app/main.cpp", "#include \"app.hpp\"\nint main() {}");
    fixture.fs.write("src/app/extra.cpp", "int extra() { return 0; }");
    let graph = default_graph();

    fixture.build(&graph).await;
    let cache = FingerprintCache::try_load(&fixture.config.cache_path).unwrap();
    let main = &cache.target("app").unwrap().units[Path::new("src/app/main.cpp")];
    assert_eq!(
      main.includes.keys().cloned().collect::<Vec<_>>(),
      vec![PathBuf::from("src/app/app.hpp"), PathBuf::from("src/app/config.hpp")]
    );
    fixture.toolchain.take_calls();

    // Only a header two levels down changes
    fixture.fs.write("src/app/config.hpp", "#define LEVEL 2");
    let report = fixture.build(&graph).await;
    assert!(report.is_success());
    assert_eq!(fixture.toolchain.compiled(), vec![PathBuf::from("src/app/main.cpp")]);
    assert_eq!(fixture.toolchain.linked(), vec!["app"]);
    assert_eq!(report.outcome("core"), Some(&TargetOutcome::Skipped(SkipReason::UpToDate)));

    fixture.toolchain.take_calls();
    let report = fixture.build(&graph).await;
    assert_eq!(report.up_to_date().count(), 3);
    assert!(fixture.toolchain.calls().is_empty());

    fixture.fs.remove("src/app/config.hpp");
    fixture.fs.write("src/app/app.hpp", "#pragma once");
    fixture.build(&graph).await;
    assert_eq!(fixture.toolchain.compiled(), vec![PathBuf::from("src/app/main.cpp")]);
  }

  #[tokio::test]
  async fn library_change_relinks_dependents_only() {
    let fixture = Fixture::new();
    let graph = default_graph();

    fixture.build(&graph).await;
    fixture.toolchain.take_calls();

    fixture.fs.write("src/core/a.cpp", "int a() { return 42; }");
    let report = fixture.build(&graph).await;

    assert!(report.is_success());
    assert_eq!(fixture.toolchain.compiled(), vec![PathBuf::from("src/core/a.cpp")]);
    assert_eq!(fixture.toolchain.linked(), vec!["core", "app"]);
    assert_eq!(report.outcome("app"), Some(&TargetOutcome::Success));
    assert_eq!(report.outcome("tools"), Some(&TargetOutcome::Skipped(SkipReason::UpToDate)));
  }

  #[tokio::test]
  async fn compile_failure_skips_dependents() {
    let fixture = Fixture::new();
    fixture.toolchain.fail_source("src/core/b.cpp");
    let graph = default_graph();

    let report = fixture.build(&graph).await;

    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
      report.outcome("core"),
      Some(&TargetOutcome::Failed(FailureReason::Compile { failed: 1 }))
    );
    assert_eq!(
      report.outcome("app"),
      Some(&TargetOutcome::Skipped(SkipReason::DependencyFailed("core".to_string())))
    );
    assert_eq!(report.outcome("tools"), Some(&TargetOutcome::Success));
    assert_eq!(fixture.toolchain.linked(), vec!["tools"]);

    let core = report.target("core").unwrap();
    let failed: Vec<_> = core.failed_units().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, PathBuf::from("src/core/b.cpp"));
    assert_eq!(failed[0].exit_code, Some(1));
    assert!(failed[0].diagnostics.contains("error"));
    assert!(core.link.is_none());
  }

  #[tokio::test]
  async fn rebuild_after_failure_compiles_only_failed_units() {
    let fixture = Fixture::new();
    fixture.toolchain.fail_source("src/core/b.cpp");
    let graph = default_graph();
    fixture.build(&graph).await;

    fixture.toolchain.clear_failures();
    fixture.toolchain.take_calls();
    let report = fixture.build(&graph).await;

    // app never got a record because it was skipped
    assert!(report.is_success());
    assert_eq!(
      sorted(fixture.toolchain.compiled()),
      vec![PathBuf::from("src/app/main.cpp"), PathBuf::from("src/core/b.cpp")]
    );
    assert_eq!(fixture.toolchain.linked(), vec!["core", "app"]);
  }

  #[tokio::test]
  async fn link_failure_is_retried_without_recompiling() {
    let fixture = Fixture::new();
    fixture.toolchain.fail_link("core");
    let graph = default_graph();

    let report = fixture.build(&graph).await;
    assert_eq!(report.outcome("core"), Some(&TargetOutcome::Failed(FailureReason::Link)));
    assert_eq!(
      report.target("core").unwrap().link.as_ref().map(|l| l.status),
      Some(UnitStatus::Failed)
    );

    fixture.toolchain.clear_failures();
    fixture.toolchain.take_calls();
    let report = fixture.build(&graph).await;

    assert!(report.is_success());
    assert_eq!(sorted(fixture.toolchain.compiled()), vec![PathBuf::from("src/app/main.cpp")]);
    assert_eq!(fixture.toolchain.linked(), vec!["core", "app"]);
  }

  #[tokio::test]
  async fn header_change_recompiles_every_unit() {
    let fixture = Fixture::new();
    let graph = graph(vec![core().with_precompiled_header("src/core/pch.hpp"), app(), tools()]);

    let report = fixture.build(&graph).await;
    assert!(report.is_success());
    assert!(report.target("core").unwrap().header.is_some());
    fixture.toolchain.take_calls();

    fixture.fs.write("src/core/pch.hpp", "#include <vector>\n#include <string>");
    let report = fixture.build(&graph).await;

    assert!(report.is_success());
    let calls = fixture.toolchain.calls();
    assert_eq!(calls[0], ToolCall::Header(PathBuf::from("src/core/pch.hpp")));
    assert_eq!(
      sorted(fixture.toolchain.compiled()),
      vec![PathBuf::from("src/core/a.cpp"), PathBuf::from("src/core/b.cpp")]
    );
  }

  #[tokio::test]
  async fn header_failure_compiles_nothing() {
    let fixture = Fixture::new();
    fixture.toolchain.fail_headers();
    let graph = graph(vec![core().with_precompiled_header("src/core/pch.hpp"), app()]);

    let report = fixture.build(&graph).await;

    assert_eq!(
      report.outcome("core"),
      Some(&TargetOutcome::Failed(FailureReason::PrecompiledHeader))
    );
    assert!(fixture.toolchain.compiled().is_empty());
    assert!(fixture.toolchain.linked().is_empty());
  }

  #[tokio::test]
  async fn flag_change_recompiles_target() {
    let fixture = Fixture::new();
    fixture.build(&default_graph()).await;
    fixture.toolchain.take_calls();

    let changed = graph(vec![core().with_compiler_flag("-DNDEBUG"), app(), tools()]);
    let report = fixture.build(&changed).await;

    assert!(report.is_success());
    assert_eq!(
      sorted(fixture.toolchain.compiled()),
      vec![PathBuf::from("src/core/a.cpp"), PathBuf::from("src/core/b.cpp")]
    );
    assert_eq!(fixture.toolchain.linked(), vec!["core", "app"]);
  }

  #[tokio::test]
  async fn corrupt_cache_forces_full_rebuild() {
    let fixture = Fixture::new();
    let graph = default_graph();
    fixture.build(&graph).await;
    fixture.toolchain.take_calls();

    std::fs::write(&fixture.config.cache_path, "{\"version\": 1, \"chec").unwrap();
    let report = fixture.build(&graph).await;

    assert!(report.is_success());
    assert_eq!(report.built().count(), 3);
    assert_eq!(fixture.toolchain.compiled().len(), 4);
    assert!(FingerprintCache::try_load(&fixture.config.cache_path).is_ok());
  }

  #[tokio::test]
  async fn unknown_package_fails_before_any_tool_runs() {
    let fixture = Fixture::new();
    let graph = graph(vec![core(), app().with_package("glfw"), tools()]);

    let err = fixture.build_result(&graph).await.unwrap_err();

    assert!(matches!(
      err,
      BuildError::Config(ConfigError::UnknownPackage { ref target, ref package, .. })
        if target == "app" && package == "glfw"
    ));
    assert!(fixture.toolchain.calls().is_empty());
  }

  struct OfflineResolver;

  impl PackageResolver for OfflineResolver {
    fn resolve(&self, _package: &str) -> Result<PackageFlags, PackageError> {
      Err(PackageError::Unavailable {
        message: "pkg-config: not found".to_string(),
      })
    }
  }

  #[tokio::test]
  async fn unavailable_resolver_fails_only_affected_targets() {
    let fixture = Fixture::new();
    let graph = default_graph();

    let report = build(
      &graph,
      &fixture.tools_with(Arc::new(OfflineResolver)),
      &fixture.config,
      CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(matches!(
      report.outcome("core"),
      Some(TargetOutcome::Failed(FailureReason::Packages(_)))
    ));
    assert_eq!(
      report.outcome("app"),
      Some(&TargetOutcome::Skipped(SkipReason::DependencyFailed("core".to_string())))
    );
    assert_eq!(report.outcome("tools"), Some(&TargetOutcome::Success));
  }

  #[tokio::test]
  async fn missing_sources_fail_the_target() {
    let fixture = Fixture::new();
    let graph = graph(vec![
      TargetDescriptor::library("ghost").with_source_directory("src/ghost"),
      tools(),
    ]);

    let report = fixture.build(&graph).await;
    assert!(matches!(
      report.outcome("ghost"),
      Some(TargetOutcome::Failed(FailureReason::Sources(_)))
    ));
    assert_eq!(report.outcome("tools"), Some(&TargetOutcome::Success));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn tool_invocations_respect_job_limit() {
    let mut fixture = Fixture::with_toolchain(|fs| FakeToolchain::new(fs).with_delay(Duration::from_millis(20)));
    for i in 0..6 {
      fixture.fs.write(format!("src/core/extra{}.cpp", i), "int x;");
    }
    fixture.config = fixture.config.clone().with_jobs(2);

    let report = fixture.build(&default_graph()).await;

    assert!(report.is_success());
    assert!(fixture.toolchain.max_in_flight() <= 2);
    assert_eq!(report.compiled_units(), 10);
  }

  #[tokio::test]
  async fn cancellation_keeps_finished_work_only() {
    let mut fixture = Fixture::with_toolchain(|fs| FakeToolchain::new(fs).with_delay(Duration::from_millis(10)));
    fixture.config = fixture.config.clone().with_jobs(1);
    let graph = default_graph();

    let cancel = CancellationToken::new();
    fixture.toolchain.cancel_after_compiles(1, cancel.clone());
    let report = build(&graph, &fixture.tools(), &fixture.config, cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(fixture.toolchain.compiled().len(), 1);
    assert!(fixture.toolchain.linked().is_empty());
    assert!(
      report
        .targets
        .iter()
        .all(|t| t.outcome == TargetOutcome::Skipped(SkipReason::Cancelled))
    );

    // The finished unit is kept; nothing else is considered up to date
    fixture.toolchain.take_calls();
    let report = fixture.build(&graph).await;
    assert!(report.is_success());
    assert_eq!(report.built().count(), 3);
    assert_eq!(fixture.toolchain.compiled().len(), 3);
  }

  #[tokio::test]
  async fn cancelled_before_start_runs_nothing() {
    let fixture = Fixture::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = build(&default_graph(), &fixture.tools(), &fixture.config, cancel)
      .await
      .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.skipped().count(), 3);
    assert!(fixture.toolchain.calls().is_empty());
  }

  #[tokio::test]
  async fn empty_graph_builds_nothing() {
    let fixture = Fixture::new();
    let report = fixture.build(&graph(vec![])).await;
    assert!(report.is_success());
    assert!(report.targets.is_empty());
  }
}
