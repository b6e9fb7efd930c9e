//! mei-lib: Core types and logic for mei
//!
//! This crate provides the pieces of the mei native build orchestrator:
//! - `TargetDescriptor`: immutable description of a library or executable
//! - `BuildGraph`: validated dependency graph with a deterministic build order
//! - `TargetPlan`: stale compilation units and link decision for one target
//! - `execute::build`: dependency-driven parallel, incremental build
//! - `BuildReport`: per-target and per-unit outcomes of one invocation
//!
//! Compilers, package lookup and source scanning are reached through the
//! [`toolchain::Toolchain`], [`package::PackageResolver`] and [`fs::SourceFs`]
//! traits.

pub mod cache;
pub mod compdb;
pub mod config;
pub mod consts;
pub mod eval;
pub mod execute;
pub mod fs;
pub mod graph;
pub mod lua;
pub mod orchestrator;
pub mod package;
pub mod plan;
pub mod report;
pub mod target;
pub mod toolchain;
pub mod util;
