// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Run reports
//!
//! Turns a finished [`PipelineRun`] into a serializable [`RunReport`] with
//! an overall status and a process exit code.

mod sink;

pub use sink::{ConsoleSink, JsonFileSink, ReportSink};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::PipeflowResult;
use crate::gate::{SkipReason, Trigger};
use crate::scheduler::{PipelineRun, StageOutcome, StageStatus};

/// Exit code for configuration and internal errors
pub const EXIT_INTERNAL_ERROR: i32 = 2;

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage that ran succeeded
    Succeeded,
    /// A required stage failed
    Failed,
    /// Only optional stages failed
    PartialSuccess,
    /// The run was aborted
    Cancelled,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed => 1,
            Self::PartialSuccess => 3,
            Self::Cancelled => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::PartialSuccess => "partial success",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status of a set of stage outcomes
    pub fn from_outcomes(outcomes: &[StageOutcome], cancelled: bool) -> Self {
        if cancelled {
            return Self::Cancelled;
        }

        let failed = outcomes.iter().filter(|o| o.status == StageStatus::Failed);
        let mut any_optional = false;
        for outcome in failed {
            if !outcome.optional {
                return Self::Failed;
            }
            any_optional = true;
        }

        if any_optional {
            Self::PartialSuccess
        } else {
            Self::Succeeded
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub status: StageStatus,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl From<&StageOutcome> for StageSummary {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            name: outcome.name.clone(),
            status: outcome.status,
            optional: outcome.optional,
            skip_reason: outcome.skip_reason.clone(),
            duration_ms: outcome.duration().as_millis() as u64,
            exit_code: outcome.exit_code,
            error: outcome.error.as_ref().map(ToString::to_string),
            error_kind: outcome.error.as_ref().map(|e| e.kind()),
            outputs: outcome.outputs.clone(),
        }
    }
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub fingerprint: String,
    pub dry_run: bool,
    pub status: RunStatus,
    pub duration_ms: u64,
    /// Stages in declaration order
    pub stages: Vec<StageSummary>,
}

impl RunReport {
    /// Build the report of a finished run
    pub fn from_run(run: &PipelineRun) -> Self {
        let metadata = run.metadata();
        Self {
            run_id: metadata.run_id,
            pipeline: metadata.pipeline.clone(),
            trigger: metadata.trigger.clone(),
            started_at: metadata.started_at,
            fingerprint: metadata.fingerprint.clone(),
            dry_run: metadata.dry_run,
            status: RunStatus::from_outcomes(run.outcomes(), run.is_cancelled()),
            duration_ms: run.duration().as_millis() as u64,
            stages: run.outcomes().iter().map(StageSummary::from).collect(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Number of stages with the given status
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    pub fn to_json(&self) -> PipeflowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line summary such as `failed: 2 succeeded, 1 failed, 2 skipped`
    pub fn headline(&self) -> String {
        format!(
            "{}: {} succeeded, {} failed, {} skipped",
            self.status,
            self.count(StageStatus::Succeeded),
            self.count(StageStatus::Failed),
            self.count(StageStatus::Skipped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipeflowError;
    use crate::pipeline::{EventKind, Pipeline, Settings, Stage, StageGraph};
    use std::sync::Arc;

    fn run_for(stages: Vec<Stage>) -> PipelineRun {
        let pipeline = Pipeline {
            version: "1".into(),
            name: "release".into(),
            description: None,
            settings: Settings::default(),
            env: BTreeMap::new(),
            stages,
        };
        let graph = StageGraph::build(&pipeline).unwrap();
        PipelineRun::new(
            Arc::new(pipeline),
            Arc::new(graph),
            Trigger::new(EventKind::Push, "main"),
            false,
        )
        .unwrap()
    }

    fn failure() -> PipeflowError {
        PipeflowError::CommandFailure {
            stage: "x".into(),
            exit_code: 1,
            stderr: String::new(),
        }
    }

    fn finish(run: &mut PipelineRun, idx: usize, ok: bool) {
        run.mark_queued(idx).unwrap();
        run.mark_running(idx).unwrap();
        if ok {
            run.mark_succeeded(idx, BTreeMap::new()).unwrap();
        } else {
            run.mark_failed(idx, failure()).unwrap();
        }
    }

    #[test]
    fn test_all_succeeded() {
        let mut run = run_for(vec![Stage::new("a", "true"), Stage::new("b", "true")]);
        finish(&mut run, 0, true);
        run.mark_skipped(1, SkipReason::EventFiltered).unwrap();

        let report = RunReport::from_run(&run);
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_required_failure() {
        let mut run = run_for(vec![Stage::new("a", "true"), Stage::new("b", "true")]);
        finish(&mut run, 0, false);
        finish(&mut run, 1, true);

        let report = RunReport::from_run(&run);
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.stage("a").unwrap().error_kind, Some("command-failure"));
    }

    #[test]
    fn test_optional_failure_is_partial_success() {
        let mut audit = Stage::new("audit", "cargo audit");
        audit.allow_failure = true;
        let mut run = run_for(vec![audit, Stage::new("build", "make")]);
        finish(&mut run, 0, false);
        finish(&mut run, 1, true);

        let report = RunReport::from_run(&run);
        assert_eq!(report.status, RunStatus::PartialSuccess);
        assert_eq!(report.exit_code(), 3);
        assert!(report.stage("audit").unwrap().optional);
    }

    #[test]
    fn test_cancelled_run() {
        let mut run = run_for(vec![Stage::new("a", "sleep 100")]);
        run.set_cancelled();
        run.mark_skipped(0, SkipReason::Cancelled).unwrap();

        let report = RunReport::from_run(&run);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_json_shape() {
        let mut run = run_for(vec![Stage::new("a", "true"), Stage::new("b", "true")]);
        finish(&mut run, 0, false);
        run.mark_skipped(
            1,
            SkipReason::UpstreamNotSucceeded { stage: "a".into() },
        )
        .unwrap();

        let report = RunReport::from_run(&run);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["trigger"]["event"], "push");
        assert_eq!(json["trigger"]["ref"], "main");
        assert_eq!(json["stages"][1]["status"], "skipped");
        assert_eq!(json["stages"][1]["skip_reason"]["reason"], "upstream_not_succeeded");
        assert_eq!(json["stages"][1]["skip_reason"]["stage"], "a");
        assert_eq!(report.headline(), "failed: 0 succeeded, 1 failed, 1 skipped");
    }
}
