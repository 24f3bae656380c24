// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! # pipeflow - Pipeline Orchestrator
//!
//! `pipeflow` sequences build, test, scan and release stages with
//! dependency ordering, gating and output propagation.
//!
//! ## Features
//!
//! - **Dependency graph** - Stages run after what they depend on, in parallel otherwise
//! - **Gates** - Run stages only for some events, branches or upstream outcomes
//! - **Outputs** - Values printed by one stage become inputs of another
//! - **Concurrency groups** - Serialize stages that share a resource
//! - **Reports** - Console summary, JSON report and meaningful exit codes
//!
//! ## Quick Start
//!
//! ```bash
//! # Create a release pipeline
//! pipeflow init --template release
//!
//! # See which stages would run for a push to main
//! pipeflow run --dry-run --event push --ref main
//!
//! # Run it
//! pipeflow run --event push --ref main --report report.json
//! ```

pub mod cli;
pub mod errors;
pub mod gate;
pub mod outputs;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use errors::{PipeflowError, PipeflowResult};
pub use gate::Trigger;
pub use pipeline::{EventKind, Pipeline, Stage};
pub use report::{RunReport, RunStatus};
pub use scheduler::{PipelineRun, RunHandle, Scheduler, SchedulerOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
