//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, durations, and per-target build results.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use mei_lib::report::{SkipReason, TargetOutcome, TargetReport};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// One line per target: status symbol, name, outcome and duration.
pub fn print_target(report: &TargetReport) {
  let line = format!("{} {}", report.name, report.outcome);
  let timing = format!("({})", format_duration(report.duration));
  let timing = timing.if_supports_color(Stream::Stdout, |s| s.dimmed());

  match &report.outcome {
    TargetOutcome::Success => println!(
      "{} {} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
      line,
      timing
    ),
    TargetOutcome::Skipped(SkipReason::UpToDate) => println!(
      "{} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      line.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    TargetOutcome::Failed(_) => println!(
      "{} {} {}",
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
      line.if_supports_color(Stream::Stdout, |s| s.red()),
      timing
    ),
    TargetOutcome::Skipped(_) => println!(
      "{} {}",
      symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.yellow()),
      line.if_supports_color(Stream::Stdout, |s| s.yellow())
    ),
  }
}

/// Diagnostics of every failed invocation, grouped under its target.
pub fn print_diagnostics(report: &TargetReport) {
  for unit in report.failed_units() {
    let exit = unit
      .exit_code
      .map(|code| format!("exit code {}", code))
      .unwrap_or_else(|| "no exit code".to_string());
    eprintln!(
      "{} {} {} ({})",
      report.name.if_supports_color(Stream::Stderr, |s| s.bold()),
      symbols::ARROW,
      unit.path.display(),
      exit
    );
    for line in unit.diagnostics.lines() {
      eprintln!("    {}", line);
    }
  }
}
