// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Run state
//!
//! A [`PipelineRun`] is one invocation of the whole graph for a trigger. It
//! owns one [`StageOutcome`] per stage and the output store. Only the
//! scheduling task mutates it; every status change goes through
//! [`PipelineRun::transition`], which rejects anything that is not a forward
//! step of the stage state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::{PipeflowError, PipeflowResult};
use crate::gate::{SkipReason, Trigger, UpstreamOutcome};
use crate::outputs::OutputStore;
use crate::pipeline::{Pipeline, StageGraph};

/// Lifecycle status of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting for dependencies
    Pending,
    /// Gate allowed, waiting for a worker or a concurrency lock
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Queued, Running)
                | (Queued, Failed)
                | (Queued, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Skipped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured command output
#[derive(Debug, Clone, Default)]
pub struct StageLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Everything recorded about one stage in a run
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub name: String,
    pub status: StageStatus,
    /// Failure of this stage does not fail the run
    pub optional: bool,
    pub skip_reason: Option<SkipReason>,
    /// First error recorded for the stage
    pub error: Option<PipeflowError>,
    pub exit_code: Option<i32>,
    /// Published outputs (only for succeeded stages)
    pub outputs: BTreeMap<String, String>,
    pub logs: StageLogs,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl StageOutcome {
    fn new(name: &str, optional: bool) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            optional,
            skip_reason: None,
            error: None,
            exit_code: None,
            outputs: BTreeMap::new(),
            logs: StageLogs::default(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall time spent running, zero if the stage never started
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// The outcome as a dependent's gate sees it
    pub fn as_upstream(&self) -> Option<UpstreamOutcome> {
        match self.status {
            StageStatus::Succeeded => Some(UpstreamOutcome::Succeeded),
            StageStatus::Failed => Some(UpstreamOutcome::Failed {
                optional: self.optional,
            }),
            StageStatus::Skipped => Some(UpstreamOutcome::Skipped),
            _ => None,
        }
    }
}

/// Identity of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub pipeline: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    /// BLAKE3 of the definition and the trigger
    pub fingerprint: String,
    pub dry_run: bool,
}

/// One invocation of a pipeline
#[derive(Debug)]
pub struct PipelineRun {
    pipeline: Arc<Pipeline>,
    graph: Arc<StageGraph>,
    metadata: RunMetadata,
    outcomes: Vec<StageOutcome>,
    outputs: OutputStore,
    cancelled: bool,
    started: Instant,
    finished: Option<Instant>,
}

impl PipelineRun {
    pub fn new(
        pipeline: Arc<Pipeline>,
        graph: Arc<StageGraph>,
        trigger: Trigger,
        dry_run: bool,
    ) -> PipeflowResult<Self> {
        let fingerprint = fingerprint(&pipeline, &trigger)?;
        let outcomes = pipeline
            .stages
            .iter()
            .map(|stage| StageOutcome::new(&stage.name, stage.is_optional()))
            .collect();

        Ok(Self {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                pipeline: pipeline.name.clone(),
                trigger,
                started_at: Utc::now(),
                fingerprint,
                dry_run,
            },
            pipeline,
            graph,
            outcomes,
            outputs: OutputStore::new(),
            cancelled: false,
            started: Instant::now(),
            finished: None,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn outcome(&self, idx: usize) -> &StageOutcome {
        &self.outcomes[idx]
    }

    pub fn outcome_by_name(&self, name: &str) -> Option<&StageOutcome> {
        self.graph.index_of(name).map(|idx| &self.outcomes[idx])
    }

    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    pub fn status(&self, idx: usize) -> StageStatus {
        self.outcomes[idx].status
    }

    pub fn outputs(&self) -> &OutputStore {
        &self.outputs
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn set_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Whether every stage is terminal
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_terminal())
    }

    pub fn duration(&self) -> Duration {
        self.finished.unwrap_or_else(Instant::now) - self.started
    }

    pub(crate) fn finish(&mut self) {
        self.finished.get_or_insert_with(Instant::now);
    }

    /// Move a stage to `next`, refusing illegal or backward steps
    pub fn transition(&mut self, idx: usize, next: StageStatus) -> PipeflowResult<()> {
        let outcome = &mut self.outcomes[idx];
        if !outcome.status.can_transition_to(next) {
            return Err(PipeflowError::InvariantViolation {
                message: format!(
                    "stage '{}' cannot go from {} to {}",
                    outcome.name, outcome.status, next
                ),
            });
        }

        let now = Instant::now();
        match next {
            StageStatus::Running => outcome.started_at = Some(now),
            s if s.is_terminal() => outcome.finished_at = Some(now),
            _ => {}
        }
        outcome.status = next;
        Ok(())
    }

    pub fn mark_queued(&mut self, idx: usize) -> PipeflowResult<()> {
        self.transition(idx, StageStatus::Queued)
    }

    pub fn mark_running(&mut self, idx: usize) -> PipeflowResult<()> {
        self.transition(idx, StageStatus::Running)
    }

    pub fn mark_skipped(&mut self, idx: usize, reason: SkipReason) -> PipeflowResult<()> {
        self.transition(idx, StageStatus::Skipped)?;
        self.outcomes[idx].skip_reason = Some(reason);
        Ok(())
    }

    pub fn mark_failed(&mut self, idx: usize, error: PipeflowError) -> PipeflowResult<()> {
        self.transition(idx, StageStatus::Failed)?;
        self.outcomes[idx].error.get_or_insert(error);
        Ok(())
    }

    /// Mark a stage succeeded and publish its outputs
    pub fn mark_succeeded(
        &mut self,
        idx: usize,
        outputs: BTreeMap<String, String>,
    ) -> PipeflowResult<()> {
        self.transition(idx, StageStatus::Succeeded)?;
        let name = self.graph.name(idx).to_string();
        self.outputs.publish(&name, outputs.clone())?;
        self.outcomes[idx].outputs = outputs;
        Ok(())
    }

    pub(crate) fn record_logs(&mut self, idx: usize, logs: StageLogs, exit_code: Option<i32>) {
        let outcome = &mut self.outcomes[idx];
        outcome.logs = logs;
        outcome.exit_code = exit_code;
    }

    /// Direct dependencies of a stage with their outcomes, if all are terminal
    pub fn upstream_outcomes(&self, idx: usize) -> Option<Vec<(&str, UpstreamOutcome)>> {
        self.graph
            .upstream_of(idx)
            .iter()
            .map(|&dep| {
                let outcome = self.outcomes[dep].as_upstream()?;
                Some((self.graph.name(dep), outcome))
            })
            .collect()
    }

    /// Status lookup by stage name
    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.outcome_by_name(name).map(|o| o.status)
    }
}

/// Stable fingerprint of a definition and trigger
pub fn fingerprint(pipeline: &Pipeline, trigger: &Trigger) -> PipeflowResult<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(pipeline)?);
    hasher.update(&serde_json::to_vec(trigger)?);
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EventKind, Settings, Stage};

    fn run_for(stages: Vec<Stage>) -> PipelineRun {
        let pipeline = Pipeline {
            version: "1".into(),
            name: "test".into(),
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

    #[test]
    fn test_forward_transitions() {
        let mut run = run_for(vec![Stage::new("build", "make")]);

        run.mark_queued(0).unwrap();
        run.mark_running(0).unwrap();
        run.mark_succeeded(0, BTreeMap::new()).unwrap();

        assert_eq!(run.status(0), StageStatus::Succeeded);
        assert!(run.is_complete());
        assert!(run.outcome(0).started_at.is_some());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut run = run_for(vec![Stage::new("build", "make")]);
        run.mark_skipped(0, SkipReason::EventFiltered).unwrap();

        let err = run.mark_failed(0, PipeflowError::Cancelled).unwrap_err();
        assert!(matches!(err, PipeflowError::InvariantViolation { .. }));
        assert!(run.mark_skipped(0, SkipReason::Cancelled).is_err());
        assert_eq!(run.status(0), StageStatus::Skipped);
        assert_eq!(run.outcome(0).skip_reason, Some(SkipReason::EventFiltered));
    }

    #[test]
    fn test_cannot_skip_queue() {
        let mut run = run_for(vec![Stage::new("build", "make")]);
        assert!(run.mark_running(0).is_err());
        assert_eq!(run.status(0), StageStatus::Pending);
    }

    #[test]
    fn test_first_error_is_kept() {
        let mut run = run_for(vec![Stage::new("build", "make")]);
        run.mark_queued(0).unwrap();
        run.outcomes[0].error = Some(PipeflowError::Cancelled);
        run.mark_failed(
            0,
            PipeflowError::CommandFailure {
                stage: "build".into(),
                exit_code: 1,
                stderr: String::new(),
            },
        )
        .unwrap();

        assert!(matches!(run.outcome(0).error, Some(PipeflowError::Cancelled)));
    }

    #[test]
    fn test_upstream_outcomes_wait_for_terminal() {
        let mut run = run_for(vec![
            Stage::new("checkout", "git clone"),
            Stage::new("build", "make").after(&["checkout"]),
        ]);
        assert!(run.upstream_outcomes(1).is_none());

        run.mark_queued(0).unwrap();
        run.mark_failed(0, PipeflowError::Cancelled).unwrap();

        let upstream = run.upstream_outcomes(1).unwrap();
        assert_eq!(upstream, vec![("checkout", UpstreamOutcome::Failed { optional: false })]);
    }

    #[test]
    fn test_fingerprint_depends_on_trigger() {
        let run = run_for(vec![Stage::new("build", "make")]);
        let push = fingerprint(run.pipeline(), &Trigger::new(EventKind::Push, "main")).unwrap();
        let manual = fingerprint(run.pipeline(), &Trigger::new(EventKind::Manual, "main")).unwrap();

        assert_eq!(push, run.metadata().fingerprint);
        assert_ne!(push, manual);
        assert_eq!(push.len(), 64);
    }
}
