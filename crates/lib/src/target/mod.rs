//! Target descriptors.
//!
//! A target is a named compilation goal: a library or an executable. Each target
//! is described by an immutable [`TargetDescriptor`] assembled with plain
//! `with_*` builder methods and validated once, when the graph is finalized.
//!
//! # Characteristics
//!
//! - **Immutable**: Descriptors are never modified after registration
//! - **Declarative**: A descriptor lists inputs, not build steps
//! - **Composable**: Targets name the other targets they depend on

mod types;

pub use types::*;
