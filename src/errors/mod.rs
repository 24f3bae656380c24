// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Error types
//!
//! Every failure the orchestrator can report, from definition problems that
//! stop a run before it starts to stage-level failures recorded in a report.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeflow operations
pub type PipeflowResult<T> = Result<T, PipeflowError>;

/// Main error type for pipeflow
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum PipeflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(pipeflow::pipeline_not_found),
        help("Create a pipeline with 'pipeflow init' or write .pipeflow.yaml manually")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(pipeflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage '{stage}' is defined more than once")]
    #[diagnostic(
        code(pipeflow::duplicate_stage),
        help("Stage names must be unique within a pipeline")
    )]
    DuplicateStage { stage: String },

    #[error("Cyclic dependency detected: {}", stages.join(" → "))]
    #[diagnostic(
        code(pipeflow::cyclic_dependency),
        help("Review your stage dependencies and input references to remove the cycle")
    )]
    CyclicDependency { stages: Vec<String> },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(
        code(pipeflow::unknown_dependency),
        help("Check that '{dependency}' is defined in your pipeline")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{stage}' reads '{reference}', which is not a declared output")]
    #[diagnostic(
        code(pipeflow::unknown_output),
        help("List the key under 'outputs' of the producing stage")
    )]
    UnknownOutput { stage: String, reference: String },

    #[error("Stage '{stage}' not found in pipeline")]
    #[diagnostic(code(pipeflow::stage_not_found))]
    StageNotFound { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Gate Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Condition for stage '{stage}' is malformed: {message}")]
    #[diagnostic(
        code(pipeflow::gate_evaluation),
        help("Conditions use &&, ||, !, ==, != and functions like success() or matches()")
    )]
    GateEvaluation { stage: String, message: String },

    #[error("Invalid branch pattern '{pattern}': {message}")]
    #[diagnostic(code(pipeflow::branch_pattern))]
    BranchPattern { pattern: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' timed out after {}s", timeout.as_secs())]
    #[diagnostic(
        code(pipeflow::timeout),
        help("Raise 'timeout_secs' on the stage or in settings if the work needs longer")
    )]
    Timeout { stage: String, timeout: Duration },

    #[error("Stage '{stage}' exited with code {exit_code}")]
    #[diagnostic(code(pipeflow::command_failure))]
    CommandFailure {
        stage: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to start command for stage '{stage}': {error}")]
    #[diagnostic(code(pipeflow::spawn_failed))]
    SpawnFailed {
        stage: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Output '{reference}' read by stage '{stage}' is not ready yet")]
    #[diagnostic(code(pipeflow::output_not_ready))]
    OutputNotReady { stage: String, reference: String },

    #[error("Output '{reference}' read by stage '{stage}' is unavailable: {reason}")]
    #[diagnostic(code(pipeflow::output_unavailable))]
    OutputUnavailable {
        stage: String,
        reference: String,
        reason: String,
    },

    #[error("Stage '{stage}' already published its outputs")]
    #[diagnostic(code(pipeflow::output_already_published))]
    OutputAlreadyPublished { stage: String },

    #[error("Secret '{name}' requested by stage '{stage}' is not available")]
    #[diagnostic(
        code(pipeflow::secret_unavailable),
        help("Export '{name}' in the environment that runs pipeflow")
    )]
    SecretUnavailable { stage: String, name: String },

    #[error("Run cancelled")]
    #[diagnostic(code(pipeflow::cancelled))]
    Cancelled,

    #[error("Scheduler invariant violated: {message}")]
    #[diagnostic(code(pipeflow::invariant_violation))]
    InvariantViolation { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(pipeflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(pipeflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(pipeflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(pipeflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(pipeflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(pipeflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for PipeflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for PipeflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for PipeflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for PipeflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl PipeflowError {
    /// Create a spawn error with a hint about the shell or program
    pub fn spawn_failed(stage: &str, program: &str, error: impl ToString) -> Self {
        Self::SpawnFailed {
            stage: stage.to_string(),
            error: error.to_string(),
            help: Some(format!("'{}' may not be installed or on PATH", program)),
        }
    }

    /// Whether this error makes the whole run unusable rather than one stage
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::UnknownDependency { .. }
                | Self::UnknownOutput { .. }
                | Self::DuplicateStage { .. }
                | Self::InvalidPipeline { .. }
                | Self::InvariantViolation { .. }
                | Self::OutputAlreadyPublished { .. }
        )
    }

    /// Short label used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CyclicDependency { .. } => "cyclic-dependency",
            Self::GateEvaluation { .. } | Self::BranchPattern { .. } => "gate-evaluation",
            Self::Timeout { .. } => "timeout",
            Self::CommandFailure { .. } | Self::SpawnFailed { .. } => "command-failure",
            Self::OutputNotReady { .. } => "output-not-ready",
            Self::OutputUnavailable { .. } => "output-unavailable",
            Self::SecretUnavailable { .. } => "secret-unavailable",
            Self::Cancelled => "cancelled",
            Self::InvariantViolation { .. } | Self::OutputAlreadyPublished { .. } => "internal",
            _ => "definition",
        }
    }
}
