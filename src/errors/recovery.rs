// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Recovery suggestions
//!
//! Turns an error into concrete next steps, printed by the CLI in verbose mode.

use super::PipeflowError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if one applies
    pub fn for_error(error: &PipeflowError) -> Option<Self> {
        match error {
            PipeflowError::CyclicDependency { stages } => Some(Self::fix_cycle(stages)),
            PipeflowError::PipelineNotFound { .. } => Some(Self::create_pipeline()),
            PipeflowError::Timeout { stage, timeout } => {
                Some(Self::raise_timeout(stage, timeout.as_secs()))
            }
            PipeflowError::UnknownOutput { stage, reference } => {
                Some(Self::declare_output(stage, reference))
            }
            PipeflowError::SecretUnavailable { stage, name } => Some(Self {
                action: format!("Provide secret '{}'", name),
                steps: vec![format!(
                    "Stage '{}' acquires '{}' from the environment when it starts",
                    stage, name
                )],
                commands: vec![format!("export {}=...", name)],
            }),
            PipeflowError::Yaml { .. } => Some(Self::fix_yaml_syntax()),
            _ => None,
        }
    }

    /// Suggest fixing a cyclic dependency
    pub fn fix_cycle(stages: &[String]) -> Self {
        Self {
            action: "Remove cyclic dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", stages.join(" → ")),
                "Input references ('inputs') add dependencies just like 'depends_on'".into(),
                "Ensure stages form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize your pipeline:".into(),
                "pipeflow graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest creating a pipeline file
    pub fn create_pipeline() -> Self {
        Self {
            action: "Create a pipeline definition".into(),
            steps: vec!["No .pipeflow.yaml found in current directory".into()],
            commands: vec![
                "pipeflow init".into(),
                "".into(),
                "# Or start from the release template:".into(),
                "pipeflow init --template release".into(),
            ],
        }
    }

    /// Suggest raising a stage timeout
    pub fn raise_timeout(stage: &str, secs: u64) -> Self {
        Self {
            action: format!("Stage '{}' exceeded {}s", stage, secs),
            steps: vec![
                "Set 'timeout_secs' on the stage, or 'settings.timeout_secs' for all stages".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest declaring an output on its producer
    pub fn declare_output(stage: &str, reference: &str) -> Self {
        let (producer, key) = reference.split_once('.').unwrap_or((reference, ""));
        Self {
            action: format!("Declare output '{}' on stage '{}'", key, producer),
            steps: vec![
                format!("Stage '{}' reads '{}'", stage, reference),
                format!("Add '{}' to the 'outputs' list of '{}'", key, producer),
                "The producer publishes it by printing '::set-output name=<key>::<value>'".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest fixing invalid YAML
    pub fn fix_yaml_syntax() -> Self {
        Self {
            action: "Fix YAML syntax error".into(),
            steps: vec![
                "Check for common YAML issues:".into(),
                "  • Incorrect indentation (use spaces, not tabs)".into(),
                "  • Missing colons after keys".into(),
                "  • Unquoted glob patterns starting with '*'".into(),
            ],
            commands: vec!["pipeflow validate".into()],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
