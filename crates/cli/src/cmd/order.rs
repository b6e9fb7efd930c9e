//! Implementation of the `mei order` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use mei_lib::eval::load_build_graph;
use mei_lib::target::TargetKind;

use crate::output::{OutputFormat, print_json};

#[derive(Serialize)]
struct OrderEntry<'a> {
  name: &'a str,
  kind: TargetKind,
  dependencies: Vec<&'a str>,
}

/// Print the targets of a build script in the order they would be built.
pub fn cmd_order(script: &Path, output: OutputFormat) -> Result<()> {
  let graph =
    load_build_graph(script).with_context(|| format!("Failed to evaluate build script: {}", script.display()))?;

  if output.is_json() {
    let entries: Vec<_> = graph
      .order()
      .map(|t| OrderEntry {
        name: &t.name,
        kind: t.kind,
        dependencies: graph.dependencies(&t.name),
      })
      .collect();
    return print_json(&entries);
  }

  for (i, target) in graph.order().enumerate() {
    let deps = graph.dependencies(&target.name);
    if deps.is_empty() {
      println!("{}. {} ({})", i + 1, target.name, target.kind);
    } else {
      println!("{}. {} ({}) <- {}", i + 1, target.name, target.kind, deps.join(", "));
    }
  }

  Ok(())
}
