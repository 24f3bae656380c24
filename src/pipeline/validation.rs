// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Pipeline validation
//!
//! Validates pipeline configuration before execution. Errors stop a run
//! before any stage starts; warnings point at definitions that will load
//! but probably do not do what the author meant.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::errors::PipeflowError;
use crate::gate::{BranchPattern, Expression};
use crate::pipeline::{OnFailure, Pipeline, Stage, StageGraph};

fn stage_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").expect("valid stage name regex")
    })
}

fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name regex"))
}

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline configuration
    pub fn validate(pipeline: &Pipeline) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.stages.is_empty() {
            result.add_error("Pipeline has no stages defined");
        }

        if pipeline.settings.max_parallel == Some(0) {
            result.add_error("settings.max_parallel must be at least 1");
        }

        // Validate DAG structure (duplicates, unknown dependencies, cycles)
        if let Err(e) = StageGraph::build(pipeline) {
            result.add_error(&e.to_string());
        }

        for stage in &pipeline.stages {
            Self::validate_stage(stage, pipeline, &mut result);
        }

        result
    }

    /// Validate and turn the first error into a typed error
    pub fn ensure_valid(pipeline: &Pipeline) -> Result<ValidationResult, PipeflowError> {
        // Structural errors keep their own variant so callers can match on them
        StageGraph::build(pipeline)?;

        let result = Self::validate(pipeline);
        match result.errors.first() {
            Some(first) => Err(PipeflowError::InvalidPipeline {
                reason: first.clone(),
                help: (result.errors.len() > 1).then(|| {
                    format!(
                        "{} more error(s); run 'pipeflow validate' for the full list",
                        result.errors.len() - 1
                    )
                }),
            }),
            None => Ok(result),
        }
    }

    /// Validate a single stage
    fn validate_stage(stage: &Stage, pipeline: &Pipeline, result: &mut ValidationResult) {
        if !stage_name_pattern().is_match(&stage.name) {
            result.add_error(&format!(
                "Stage name '{}' may only contain letters, digits, '-' and '_'",
                stage.name
            ));
        }

        if stage.run.is_empty() {
            result.add_error(&format!("Stage '{}': command is empty", stage.name));
        }

        if stage.timeout_secs == Some(0) {
            result.add_error(&format!("Stage '{}': timeout_secs must be positive", stage.name));
        }

        // Input references must point at declared outputs
        for (var, reference) in &stage.inputs {
            if !env_name_pattern().is_match(var) {
                result.add_error(&format!(
                    "Stage '{}': input name '{}' is not a valid environment variable",
                    stage.name, var
                ));
            }

            let Some(producer) = pipeline.get_stage(&reference.stage) else {
                // Reported by the graph check
                continue;
            };

            if !producer.outputs.contains(&reference.key) {
                result.add_error(
                    &PipeflowError::UnknownOutput {
                        stage: stage.name.clone(),
                        reference: reference.to_string(),
                    }
                    .to_string(),
                );
            }

            if !stage.depends_on.contains(&reference.stage) {
                result.add_warning(&format!(
                    "Stage '{}': reads '{}' but doesn't declare a dependency on '{}'. \
                     This will be added implicitly.",
                    stage.name, reference, reference.stage
                ));
            }
        }

        let mut seen_outputs = HashSet::new();
        for key in &stage.outputs {
            if !seen_outputs.insert(key) {
                result.add_warning(&format!(
                    "Stage '{}': output '{}' is declared twice",
                    stage.name, key
                ));
            }
        }

        for secret in &stage.secrets {
            if !env_name_pattern().is_match(secret) {
                result.add_error(&format!(
                    "Stage '{}': secret name '{}' is not a valid environment variable",
                    stage.name, secret
                ));
            }
        }

        // Condition problems only fail the stage at run time, so they are warnings here
        for pattern in stage.when.branches.iter().chain(&stage.when.branches_ignore) {
            if let Err(e) = BranchPattern::new(pattern) {
                result.add_warning(&format!(
                    "Stage '{}': {} (the stage will fail when gated)",
                    stage.name, e
                ));
            }
        }

        if let Some(expression) = &stage.when.expression {
            if let Err(message) = Expression::parse(expression) {
                result.add_warning(&format!(
                    "Stage '{}': condition '{}' is malformed: {} (the stage will fail when gated)",
                    stage.name, expression, message
                ));
            }
        }

        if stage.on_failure != OnFailure::Propagate && stage.upstream_names().is_empty() {
            result.add_warning(&format!(
                "Stage '{}': on_failure has no effect on a stage without dependencies",
                stage.name
            ));
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{OutputRef, Settings};
    use std::collections::BTreeMap;

    fn pipeline_with(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            version: "1".into(),
            name: "test".into(),
            description: None,
            settings: Settings::default(),
            env: BTreeMap::new(),
            stages,
        }
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let result = PipelineValidator::validate(&pipeline_with(vec![]));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no stages"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let pipeline = pipeline_with(vec![Stage::new("dup", "true"), Stage::new("dup", "false")]);

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("more than once")));
    }

    #[test]
    fn test_validate_input_without_dependency() {
        let mut producer = Stage::new("bump-version", "echo ::set-output name=version::1.0.0");
        producer.outputs.push("version".into());
        let mut consumer = Stage::new("build", "make");
        consumer
            .inputs
            .insert("VERSION".into(), OutputRef::new("bump-version", "version"));

        let result = PipelineValidator::validate(&pipeline_with(vec![producer, consumer]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("implicitly")));
    }

    #[test]
    fn test_validate_undeclared_output() {
        let producer = Stage::new("bump-version", "true");
        let mut consumer = Stage::new("build", "make").after(&["bump-version"]);
        consumer
            .inputs
            .insert("VERSION".into(), OutputRef::new("bump-version", "version"));

        let pipeline = pipeline_with(vec![producer, consumer]);
        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("not a declared output")));

        assert!(matches!(
            PipelineValidator::ensure_valid(&pipeline),
            Err(PipeflowError::InvalidPipeline { .. })
        ));
    }

    #[test]
    fn test_ensure_valid_keeps_cycle_variant() {
        let pipeline = pipeline_with(vec![
            Stage::new("a", "true").after(&["b"]),
            Stage::new("b", "true").after(&["a"]),
        ]);

        assert!(matches!(
            PipelineValidator::ensure_valid(&pipeline),
            Err(PipeflowError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_malformed_condition_is_a_warning() {
        let mut stage = Stage::new("deploy", "true");
        stage.when.expression = Some("success( &&".into());

        let result = PipelineValidator::validate(&pipeline_with(vec![stage]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("malformed")));
    }

    #[test]
    fn test_misspelled_fact_in_short_circuited_condition_is_reported() {
        let mut stage = Stage::new("deploy", "true");
        stage.when.expression = Some("event == 'schedule' && brnach == 'main'".into());

        let result = PipelineValidator::validate(&pipeline_with(vec![stage]));
        assert!(result.warnings.iter().any(|w| w.contains("brnach")));
    }

    #[test]
    fn test_bad_names_are_errors() {
        let mut stage = Stage::new("build.release", "true");
        stage.secrets.push("NPM-TOKEN".into());

        let result = PipelineValidator::validate(&pipeline_with(vec![stage]));
        assert_eq!(result.errors.len(), 2);
    }
}
