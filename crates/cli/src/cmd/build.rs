//! Implementation of the `mei build` command.
//!
//! Evaluates the build script, builds every target, and prints one line per
//! target followed by the diagnostics of failed invocations. Ctrl-C cancels
//! the build; running compiler processes are allowed to finish.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mei_lib::execute::Toolset;
use mei_lib::orchestrator::Orchestrator;
use mei_lib::report::BuildReport;
use mei_lib::toolchain::GccToolchain;

use crate::DirArgs;
use crate::output::{
  OutputFormat, format_duration, print_diagnostics, print_error, print_json, print_stat, print_success,
  print_target, print_warning,
};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  pub dirs: DirArgs,
  pub jobs: Option<usize>,
  pub cxx: Option<String>,
  pub ar: Option<String>,
}

impl BuildOptions {
  fn toolchain(&self) -> GccToolchain {
    let mut toolchain = GccToolchain::default();
    if let Some(cxx) = &self.cxx {
      toolchain.cxx = cxx.clone();
    }
    if let Some(ar) = &self.ar {
      toolchain.ar = ar.clone();
    }
    toolchain
  }
}

pub fn cmd_build(script: &Path, options: &BuildOptions, output: OutputFormat) -> Result<ExitCode> {
  let config = super::build_config(&options.dirs, options.jobs);
  let tools = Toolset::local(options.toolchain());

  let project = Orchestrator::from_script(script, tools, config)
    .with_context(|| format!("Failed to evaluate build script: {}", script.display()))?
    .finalize()
    .context("Invalid target configuration")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling build");
        on_interrupt.cancel();
      }
    });
    project.build(cancel).await
  })?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  Ok(ExitCode::from(report.exit_code() as u8))
}

fn print_report(report: &BuildReport) {
  for target in &report.targets {
    print_target(target);
  }

  let failed: Vec<_> = report.failed().collect();
  if !failed.is_empty() {
    eprintln!();
    for target in &failed {
      print_diagnostics(target);
    }
  }

  println!();
  if report.cancelled {
    print_warning("Build cancelled");
  } else if report.is_success() {
    print_success("Build complete!");
  } else {
    print_error("Build failed");
  }
  print_stat("Built", &report.built().count().to_string());
  print_stat("Up to date", &report.up_to_date().count().to_string());
  print_stat("Failed", &report.failed().count().to_string());
  print_stat("Skipped", &report.skipped().count().to_string());
  print_stat("Units compiled", &report.compiled_units().to_string());
  print_stat("Duration", &format_duration(report.duration));
}
