// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Pipeline definitions and structure
//!
//! Stage definitions, the dependency graph built from them, and
//! validation of a definition before it is run.

mod dag;
mod definition;
mod validation;

pub use dag::StageGraph;
pub use definition::*;
pub use validation::{PipelineValidator, ValidationResult};
