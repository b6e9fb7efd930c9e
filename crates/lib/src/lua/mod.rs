//! Lua runtime for build scripts.
//!
//! A build script (`mei.lua`) declares targets by calling `mei.library{}` and
//! `mei.executable{}`. Evaluating it fills a [`TargetRegistry`](crate::graph::TargetRegistry).
//!
//! # Submodules
//!
//! - [`globals`] - The `mei` global table
//! - [`runtime`] - Lua VM setup and script loading
//! - [`target`] - Parsing target tables into descriptors

pub mod globals;
pub mod runtime;
pub mod target;
