//! Compilation planning.
//!
//! For one target, the planner merges package flags with the target's own
//! settings, enumerates compilation units, and compares every unit, the
//! precompiled header and the link step against the [`TargetRecord`] from the
//! previous build. The result is a [`TargetPlan`]: the executor runs exactly
//! the stale parts of it.
//!
//! # Staleness
//!
//! - A unit is stale when it has no record, its source fingerprint or compile
//!   signature changed, its object is missing, a header it included last time
//!   changed or disappeared, or the precompiled header is rebuilt in this plan.
//! - The precompiled header is stale under the same rules, using the header
//!   signature.
//! - The link step is stale when any unit is stale, the link inputs hash changed,
//!   or the artifact is missing.
//!
//! A library without sources is header-only: its plan has no link step and it
//! produces no artifact. An executable without sources is an error.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::cache::{HeaderRecord, LinkRecord, TargetRecord, UnitRecord};
use crate::fs::{Fingerprint, FsError, SourceFs};
use crate::graph::BuildGraph;
use crate::package::PackageFlags;
use crate::target::{TargetDescriptor, TargetKind};
use crate::toolchain::{CompileRequest, HeaderRequest, LinkRequest, PrecompiledHeader};
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// Why a planned step has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
  /// No record from a previous build.
  New,
  SourceChanged,
  FlagsChanged,
  ArtifactMissing,
  /// A header included by the last compile changed or no longer exists.
  IncludeChanged,
  /// The precompiled header is rebuilt in this plan.
  HeaderRebuilt,
  /// Objects or dependency artifacts feeding the link changed.
  InputsChanged,
}

/// Compiler and linker flags after merging packages with target settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveFlags {
  pub compile: Vec<String>,
  pub link: Vec<String>,
}

/// Merge package flags and target settings.
///
/// Compile flags are package include flags (deduplicated, first wins), then one
/// `-I` per include path, then explicit compiler flags verbatim so they can
/// override package defaults. Link flags are the target's exported link flags
/// followed by `dependency_link_flags`, keeping the last occurrence of each.
pub fn effective_flags(
  target: &TargetDescriptor,
  packages: &[PackageFlags],
  dependency_link_flags: &[String],
) -> EffectiveFlags {
  let mut compile: Vec<String> = Vec::new();
  for flag in packages.iter().flat_map(|p| p.include_flags.iter()) {
    if !compile.contains(flag) {
      compile.push(flag.clone());
    }
  }
  compile.extend(target.include_paths.iter().map(|p| format!("-I{}", p.display())));
  compile.extend(target.compiler_flags.iter().cloned());

  let mut link = exported_link_flags(target, packages);
  link.extend(dependency_link_flags.iter().cloned());

  EffectiveFlags {
    compile,
    link: dedup_keep_last(link),
  }
}

/// Link flags a target needs, and passes on to whatever links against it.
pub fn exported_link_flags(target: &TargetDescriptor, packages: &[PackageFlags]) -> Vec<String> {
  let mut flags: Vec<String> = packages.iter().flat_map(|p| p.link_flags.iter().cloned()).collect();
  flags.extend(target.linked_libraries.iter().map(|l| library_flag(l)));
  flags
}

/// Render a linked library entry as a linker argument.
///
/// Paths and flags are passed through; bare names become `-l<name>`.
pub fn library_flag(library: &str) -> String {
  let is_path = library.contains('/')
    || library.contains('\\')
    || [".a", ".so", ".lib", ".dylib"].iter().any(|ext| library.ends_with(ext));
  if library.starts_with('-') || is_path {
    library.to_string()
  } else {
    format!("-l{}", library)
  }
}

fn dedup_keep_last(flags: Vec<String>) -> Vec<String> {
  let mut out: Vec<String> = Vec::with_capacity(flags.len());
  for flag in flags.into_iter().rev() {
    if !out.contains(&flag) {
      out.push(flag);
    }
  }
  out.reverse();
  out
}

#[derive(Serialize)]
struct HeaderSignature<'a> {
  flags: &'a [String],
  standard: Option<&'a str>,
}

impl Hashable for HeaderSignature<'_> {}

#[derive(Serialize)]
struct CompileSignature<'a> {
  flags: &'a [String],
  standard: Option<&'a str>,
  precompiled_header: Option<&'a Path>,
}

impl Hashable for CompileSignature<'_> {}

#[derive(Serialize)]
struct LinkSignature<'a> {
  kind: TargetKind,
  objects: &'a [PathBuf],
  dependencies: &'a [(PathBuf, Option<Fingerprint>)],
  link_flags: &'a [String],
  output: &'a Path,
}

impl Hashable for LinkSignature<'_> {}

/// What the planner needs besides the target itself.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
  /// Resolved flags of the target's packages, in declaration order.
  pub packages: Vec<PackageFlags>,
  /// Exported link flags of transitive dependencies, in link order.
  pub dependency_link_flags: Vec<String>,
  /// Artifacts of transitive dependencies, in link order.
  pub dependency_artifacts: Vec<PathBuf>,
}

impl PlanInputs {
  /// Inputs for `target` given the resolved packages of every target.
  ///
  /// Executables link the exported link flags of every library they
  /// transitively depend on, and the artifact of each such library found in
  /// `artifacts`. Header-only libraries have no artifact and contribute flags
  /// only. Libraries are archived on their own.
  pub fn for_target(
    graph: &BuildGraph,
    target: &TargetDescriptor,
    resolved: &HashMap<String, Vec<PackageFlags>>,
    artifacts: &HashMap<String, PathBuf>,
  ) -> Self {
    let mut inputs = PlanInputs {
      packages: resolved.get(&target.name).cloned().unwrap_or_default(),
      ..Default::default()
    };
    if target.kind != TargetKind::Executable {
      return inputs;
    }

    for name in graph.transitive_dependencies(&target.name) {
      let Some(dependency) = graph.target(name) else {
        continue;
      };
      if dependency.kind != TargetKind::Library {
        continue;
      }
      let packages = resolved.get(name).map(Vec::as_slice).unwrap_or_default();
      if let Some(artifact) = artifacts.get(name) {
        inputs.dependency_artifacts.push(artifact.clone());
      }
      inputs
        .dependency_link_flags
        .extend(exported_link_flags(dependency, packages));
    }
    inputs
  }
}

/// One source file compiled to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
  pub source: PathBuf,
  pub object: PathBuf,
  pub fingerprint: Fingerprint,
  /// `None` when the recorded object is still valid.
  pub stale: Option<StaleReason>,
  /// Headers recorded by the last compile. Empty for stale units.
  pub includes: BTreeMap<PathBuf, Fingerprint>,
}

impl CompilationUnit {
  pub fn is_stale(&self) -> bool {
    self.stale.is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPlan {
  pub header: PathBuf,
  pub artifact: PathBuf,
  pub fingerprint: Fingerprint,
  pub flags_hash: ObjectHash,
  pub stale: Option<StaleReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
  pub objects: Vec<PathBuf>,
  pub dependency_artifacts: Vec<PathBuf>,
  pub link_flags: Vec<String>,
  pub output: PathBuf,
  pub inputs_hash: ObjectHash,
  pub stale: Option<StaleReason>,
}

/// Everything needed to bring one target up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
  pub target: String,
  pub kind: TargetKind,
  pub compile_flags: Vec<String>,
  pub standard: Option<String>,
  pub flags_hash: ObjectHash,
  pub header: Option<HeaderPlan>,
  pub units: Vec<CompilationUnit>,
  /// `None` for header-only libraries.
  pub link: Option<LinkPlan>,
}

impl TargetPlan {
  /// Whether nothing in the plan has to run.
  pub fn is_up_to_date(&self) -> bool {
    self.header.as_ref().is_none_or(|h| h.stale.is_none())
      && self.units.iter().all(|u| !u.is_stale())
      && self.link.as_ref().is_none_or(|l| l.stale.is_none())
  }

  /// The artifact this target produces, if it links one.
  pub fn artifact(&self) -> Option<&Path> {
    self.link.as_ref().map(|l| l.output.as_path())
  }

  pub fn stale_units(&self) -> impl Iterator<Item = &CompilationUnit> {
    self.units.iter().filter(|u| u.is_stale())
  }

  pub fn header_request(&self) -> Option<HeaderRequest> {
    self.header.as_ref().map(|h| HeaderRequest {
      target: self.target.clone(),
      header: h.header.clone(),
      output: h.artifact.clone(),
      flags: self.compile_flags.clone(),
      standard: self.standard.clone(),
    })
  }

  pub fn compile_request(&self, unit: &CompilationUnit) -> CompileRequest {
    CompileRequest {
      target: self.target.clone(),
      source: unit.source.clone(),
      output: unit.object.clone(),
      flags: self.compile_flags.clone(),
      standard: self.standard.clone(),
      precompiled_header: self.header.as_ref().map(|h| PrecompiledHeader {
        header: h.header.clone(),
        artifact: h.artifact.clone(),
      }),
    }
  }

  pub fn link_request(&self) -> Option<LinkRequest> {
    self.link.as_ref().map(|link| LinkRequest {
      target: self.target.clone(),
      kind: self.kind,
      objects: link.objects.clone(),
      dependency_artifacts: link.dependency_artifacts.clone(),
      link_flags: link.link_flags.clone(),
      output: link.output.clone(),
    })
  }

  /// Record of `unit` as planned, keeping the includes of its last compile.
  pub fn unit_record(&self, unit: &CompilationUnit) -> UnitRecord {
    self.compiled_unit_record(unit, unit.includes.clone())
  }

  /// Record of `unit` after a compile that read `includes`.
  pub fn compiled_unit_record(&self, unit: &CompilationUnit, includes: BTreeMap<PathBuf, Fingerprint>) -> UnitRecord {
    UnitRecord {
      flags_hash: self.flags_hash.clone(),
      fingerprint: unit.fingerprint.clone(),
      artifact: unit.object.clone(),
      includes,
    }
  }

  pub fn header_record(&self) -> Option<HeaderRecord> {
    self.header.as_ref().map(|h| HeaderRecord {
      header: h.header.clone(),
      flags_hash: h.flags_hash.clone(),
      fingerprint: h.fingerprint.clone(),
      artifact: h.artifact.clone(),
    })
  }

  pub fn link_record(&self) -> Option<LinkRecord> {
    self.link.as_ref().map(|link| LinkRecord {
      inputs_hash: link.inputs_hash.clone(),
      artifact: link.output.clone(),
    })
  }

  /// Record carrying over every step that is not stale.
  ///
  /// Stale steps are added by the executor as they succeed.
  pub fn fresh_record(&self) -> TargetRecord {
    let mut record = TargetRecord::default();
    for unit in self.units.iter().filter(|u| !u.is_stale()) {
      record.units.insert(unit.source.clone(), self.unit_record(unit));
    }
    if let Some(header) = &self.header
      && header.stale.is_none()
    {
      record.header = self.header_record();
    }
    if let Some(link) = &self.link
      && link.stale.is_none()
    {
      record.link = self.link_record();
    }
    record
  }
}

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Fs(#[from] FsError),

  /// An executable found no compilation units to link.
  #[error("target {target} has no source files")]
  NoSources { target: String },

  #[error("failed to hash flag signature: {0}")]
  Hash(#[from] HashError),
}

/// Object file location for `source`, found in the `index`-th source directory `dir`.
///
/// Objects are grouped per source directory so equal relative paths in different
/// directories cannot collide, and keep the source extension (`a.c` and `a.cpp`
/// get distinct objects).
pub fn object_path(build_dir: &Path, target: &str, index: usize, dir: &Path, source: &Path) -> PathBuf {
  let dir_name = dir
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_else(|| "src".to_string());

  let relative = source.strip_prefix(dir).unwrap_or(source);
  let mut object = build_dir.join(target).join("obj").join(format!("{}-{}", index, dir_name));
  for component in relative.components() {
    match component {
      Component::Normal(part) => object.push(part),
      Component::ParentDir => object.push("__"),
      _ => {}
    }
  }

  let mut file_name = object.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  file_name.push(".o");
  object.set_file_name(file_name);
  object
}

/// Location of the compiled form of `header`.
pub fn precompiled_header_path(build_dir: &Path, target: &str, header: &Path) -> PathBuf {
  let mut name = header.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".gch");
  build_dir.join(target).join("pch").join(name)
}

/// Plan one target against its previous record.
pub fn plan_target(
  target: &TargetDescriptor,
  inputs: &PlanInputs,
  previous: Option<&TargetRecord>,
  fs: &dyn SourceFs,
  build_dir: &Path,
) -> Result<TargetPlan, PlanError> {
  let flags = effective_flags(target, &inputs.packages, &inputs.dependency_link_flags);
  let standard = target.standard.clone();

  let header = match &target.precompiled_header {
    Some(header) => {
      let artifact = precompiled_header_path(build_dir, &target.name, header);
      let fingerprint = fs.read_fingerprint(header)?;
      let flags_hash = HeaderSignature {
        flags: &flags.compile,
        standard: standard.as_deref(),
      }
      .compute_hash()?;

      let stale = match previous.and_then(|p| p.header.as_ref()) {
        None => Some(StaleReason::New),
        Some(record) if record.header != *header || record.artifact != artifact => Some(StaleReason::New),
        Some(record) if record.fingerprint != fingerprint => Some(StaleReason::SourceChanged),
        Some(record) if record.flags_hash != flags_hash => Some(StaleReason::FlagsChanged),
        Some(_) if !fs.exists(&artifact) => Some(StaleReason::ArtifactMissing),
        Some(_) => None,
      };

      Some(HeaderPlan {
        header: header.clone(),
        artifact,
        fingerprint,
        flags_hash,
        stale,
      })
    }
    None => None,
  };
  let header_rebuilt = header.as_ref().is_some_and(|h| h.stale.is_some());

  let flags_hash = CompileSignature {
    flags: &flags.compile,
    standard: standard.as_deref(),
    precompiled_header: header.as_ref().map(|h| h.artifact.as_path()),
  }
  .compute_hash()?;

  let mut units = Vec::new();
  for (index, dir) in target.source_directories.iter().enumerate() {
    for source in fs.list_source_files(dir)? {
      let object = object_path(build_dir, &target.name, index, dir, &source);
      let fingerprint = fs.read_fingerprint(&source)?;
      let recorded = previous.and_then(|p| p.units.get(&source));

      let stale = match recorded {
        None => Some(StaleReason::New),
        Some(record) if record.fingerprint != fingerprint => Some(StaleReason::SourceChanged),
        Some(record) if record.flags_hash != flags_hash => Some(StaleReason::FlagsChanged),
        Some(record) if record.artifact != object || !fs.exists(&object) => Some(StaleReason::ArtifactMissing),
        Some(record) if includes_changed(fs, record) => Some(StaleReason::IncludeChanged),
        Some(_) if header_rebuilt => Some(StaleReason::HeaderRebuilt),
        Some(_) => None,
      };
      let includes = match (stale, recorded) {
        (None, Some(record)) => record.includes.clone(),
        _ => BTreeMap::new(),
      };

      units.push(CompilationUnit {
        source,
        object,
        fingerprint,
        stale,
        includes,
      });
    }
  }

  let link = if units.is_empty() {
    if target.kind == TargetKind::Executable {
      return Err(PlanError::NoSources {
        target: target.name.clone(),
      });
    }
    None
  } else {
    Some(plan_link(target, inputs, &units, &flags.link, previous, fs, build_dir)?)
  };

  let plan = TargetPlan {
    target: target.name.clone(),
    kind: target.kind,
    compile_flags: flags.compile,
    standard,
    flags_hash,
    header,
    units,
    link,
  };

  debug!(
    target = %plan.target,
    units = plan.units.len(),
    stale = plan.stale_units().count(),
    link = ?plan.link.as_ref().map(|l| l.stale),
    "planned target"
  );

  Ok(plan)
}

/// Whether a header recorded for a unit changed or disappeared.
fn includes_changed(fs: &dyn SourceFs, record: &UnitRecord) -> bool {
  record
    .includes
    .iter()
    .any(|(header, fingerprint)| fs.read_fingerprint(header).ok().as_ref() != Some(fingerprint))
}

fn plan_link(
  target: &TargetDescriptor,
  inputs: &PlanInputs,
  units: &[CompilationUnit],
  link_flags: &[String],
  previous: Option<&TargetRecord>,
  fs: &dyn SourceFs,
  build_dir: &Path,
) -> Result<LinkPlan, PlanError> {
  let objects: Vec<PathBuf> = units.iter().map(|u| u.object.clone()).collect();
  let output = target.artifact_path(build_dir);
  let dependencies: Vec<(PathBuf, Option<Fingerprint>)> = inputs
    .dependency_artifacts
    .iter()
    .map(|artifact| (artifact.clone(), fs.read_fingerprint(artifact).ok()))
    .collect();
  let inputs_hash = LinkSignature {
    kind: target.kind,
    objects: &objects,
    dependencies: &dependencies,
    link_flags,
    output: &output,
  }
  .compute_hash()?;

  let link_stale = if units.iter().any(|u| u.is_stale()) {
    Some(StaleReason::InputsChanged)
  } else {
    match previous.and_then(|p| p.link.as_ref()) {
      None => Some(StaleReason::New),
      Some(record) if record.inputs_hash != inputs_hash || record.artifact != output => {
        Some(StaleReason::InputsChanged)
      }
      Some(_) if !fs.exists(&output) => Some(StaleReason::ArtifactMissing),
      Some(_) => None,
    }
  };

  Ok(LinkPlan {
    objects,
    dependency_artifacts: inputs.dependency_artifacts.clone(),
    link_flags: link_flags.to_vec(),
    output,
    inputs_hash,
    stale: link_stale,
  })
}
