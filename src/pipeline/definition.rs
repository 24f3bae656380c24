// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for `.pipeflow.yaml` files. The same schema loads from
//! JSON or TOML, chosen by file extension.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::errors::{PipeflowError, PipeflowResult};

/// Pipeline definition from .pipeflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Run-wide settings
    #[serde(default)]
    pub settings: Settings,

    /// Global environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Pipeline {
    /// Load a pipeline, picking the format from the file extension
    pub fn from_file(path: &Path) -> PipeflowResult<Self> {
        if !path.exists() {
            return Err(PipeflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| PipeflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> PipeflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse pipeline from JSON string
    pub fn from_json(json: &str) -> PipeflowResult<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Parse pipeline from TOML string
    pub fn from_toml(source: &str) -> PipeflowResult<Self> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> PipeflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get all stage names
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Run-wide settings, overridable from the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum stages running at once (defaults to available parallelism)
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Default stage timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Seconds a cancelled command gets before it is killed
    #[serde(default = "default_grace")]
    pub cancel_grace_secs: u64,

    /// Abort the whole run on the first required failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Shell used for script commands
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_parallel: None,
            timeout_secs: None,
            cancel_grace_secs: default_grace(),
            fail_fast: false,
            shell: default_shell(),
        }
    }
}

fn default_grace() -> u64 {
    10
}

fn default_shell() -> String {
    "bash".to_string()
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name (must be unique within pipeline)
    pub name: String,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Command to execute
    pub run: CommandSpec,

    /// Shell override for script commands
    #[serde(default)]
    pub shell: Option<String>,

    /// Stage dependencies (other stage names)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Outputs of other stages, bound to environment variable names
    #[serde(default)]
    pub inputs: BTreeMap<String, OutputRef>,

    /// Output keys this stage publishes
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Trigger conditions
    #[serde(default)]
    pub when: Conditions,

    /// How this stage reacts to upstream failures
    #[serde(default)]
    pub on_failure: OnFailure,

    /// A failure of this stage does not fail the run
    #[serde(default)]
    pub allow_failure: bool,

    /// Stages sharing a fail-fast group are skipped when one of them fails
    #[serde(default)]
    pub fail_fast_group: Option<String>,

    /// At most one stage per concurrency group runs at a time
    #[serde(default)]
    pub concurrency_group: Option<String>,

    /// Stage timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Environment variables for this stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Secrets acquired for the lifetime of the command
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl Stage {
    /// Create a script stage with default policies
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            run: CommandSpec::Script(script.into()),
            shell: None,
            depends_on: vec![],
            inputs: BTreeMap::new(),
            outputs: vec![],
            when: Conditions::default(),
            on_failure: OnFailure::default(),
            allow_failure: false,
            fail_fast_group: None,
            concurrency_group: None,
            timeout_secs: None,
            env: BTreeMap::new(),
            secrets: vec![],
        }
    }

    /// Builder helper: add explicit dependencies
    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    /// Every stage this one must wait for, explicit or through inputs,
    /// without duplicates and in first-mention order
    pub fn upstream_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.depends_on
            .iter()
            .map(String::as_str)
            .chain(self.inputs.values().map(|r| r.stage.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Whether a failure of this stage leaves the run successful
    pub fn is_optional(&self) -> bool {
        self.allow_failure
    }

    /// Effective timeout given the run settings
    pub fn timeout(&self, settings: &Settings) -> Option<Duration> {
        self.timeout_secs
            .or(settings.timeout_secs)
            .map(Duration::from_secs)
    }

    /// Short description of the command, for plans and graphs
    pub fn command_label(&self) -> String {
        match &self.run {
            CommandSpec::Script(script) => {
                let first = script.lines().next().unwrap_or_default().trim();
                if script.lines().count() > 1 {
                    format!("{} …", first)
                } else {
                    first.to_string()
                }
            }
            CommandSpec::Argv(argv) => argv.join(" "),
        }
    }
}

/// Command specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Script passed to the shell with `-c`
    Script(String),
    /// Program and arguments executed directly
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Whether there is anything to run
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Script(s) => s.trim().is_empty(),
            Self::Argv(v) => v.first().map_or(true, |p| p.is_empty()),
        }
    }
}

/// Reference to an output of another stage, written `stage.key`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputRef {
    /// Producing stage
    pub stage: String,
    /// Output key on the producer
    pub key: String,
}

impl OutputRef {
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

impl std::str::FromStr for OutputRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((stage, key)) if !stage.is_empty() && !key.is_empty() => {
                Ok(Self::new(stage.trim(), key.trim()))
            }
            _ => Err(format!(
                "Output reference '{}' must have the form '<stage>.<key>'",
                s
            )),
        }
    }
}

impl TryFrom<String> for OutputRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputRef> for String {
    fn from(value: OutputRef) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.stage, self.key)
    }
}

/// Trigger conditions for a stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// Events that may run this stage (empty means any)
    #[serde(default)]
    pub events: Vec<EventKind>,

    /// Branch globs that may run this stage (empty means any)
    #[serde(default)]
    pub branches: Vec<String>,

    /// Branch globs that never run this stage
    #[serde(default)]
    pub branches_ignore: Vec<String>,

    /// Boolean expression over event, ref, branch and upstream outcomes
    #[serde(default, rename = "if")]
    pub expression: Option<String>,
}

impl Conditions {
    /// Whether no filter is set at all
    pub fn is_unconditional(&self) -> bool {
        self.events.is_empty()
            && self.branches.is_empty()
            && self.branches_ignore.is_empty()
            && self.expression.is_none()
    }
}

/// Trigger event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    #[serde(alias = "pull-request")]
    PullRequest,
    #[serde(alias = "dispatch", alias = "workflow_dispatch")]
    Manual,
    Schedule,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::Manual => "manual",
            Self::Schedule => "schedule",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "push" => Ok(Self::Push),
            "pull_request" | "pr" => Ok(Self::PullRequest),
            "manual" | "dispatch" | "workflow_dispatch" => Ok(Self::Manual),
            "schedule" | "cron" => Ok(Self::Schedule),
            _ => Err(format!(
                "Unknown event type: {} (expected push, pull_request, manual, schedule)",
                s
            )),
        }
    }
}

/// Policy applied when upstream stages did not all succeed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Skip unless every upstream stage succeeded
    #[default]
    Propagate,
    /// Run once upstream stages are finished, whatever their outcome
    Continue,
    /// Like `Continue`, and not skipped by fail-fast groups
    #[serde(alias = "always_run")]
    Always,
}
