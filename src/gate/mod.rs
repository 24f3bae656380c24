// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Gate evaluation
//!
//! Decides, once all of a stage's dependencies have finished, whether the
//! stage runs in this run or is skipped. The decision looks at the upstream
//! outcomes (through the stage's `on_failure` policy), the trigger event, the
//! branch, and the optional `when.if` expression, in that order.

mod expr;
mod pattern;

pub use expr::Expression;
pub use pattern::{branch_name, matches_any, BranchPattern};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::errors::{PipeflowError, PipeflowResult};
use crate::pipeline::{EventKind, OnFailure, Stage};

/// The event that started a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Event type
    pub event: EventKind,
    /// Git ref as given (`main` or `refs/heads/main`)
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl Trigger {
    pub fn new(event: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            event,
            git_ref: git_ref.into(),
        }
    }

    /// Branch name used for branch filters
    pub fn branch(&self) -> &str {
        branch_name(&self.git_ref)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.event, self.git_ref)
    }
}

/// Terminal outcome of a dependency, as seen by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Succeeded,
    Failed { optional: bool },
    Skipped,
}

impl UpstreamOutcome {
    /// Whether a `propagate` dependent may run after this outcome
    pub fn satisfies(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { optional: true })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "success",
            Self::Failed { .. } => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was skipped
    UpstreamNotSucceeded { stage: String },
    /// The trigger event is not in `when.events`
    EventFiltered,
    /// The branch is excluded by `when.branches` or `when.branches_ignore`
    BranchFiltered,
    /// `when.if` evaluated to false
    ConditionFalse,
    /// Another stage of the same fail-fast group failed
    FailFast { stage: String },
    /// The run was aborted
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamNotSucceeded { stage } => write!(f, "'{}' did not succeed", stage),
            Self::EventFiltered => write!(f, "event not selected"),
            Self::BranchFiltered => write!(f, "branch not selected"),
            Self::ConditionFalse => write!(f, "condition is false"),
            Self::FailFast { stage } => write!(f, "fail-fast after '{}' failed", stage),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Admission decision for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Skip(SkipReason),
}

/// Facts available to a condition expression
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub trigger: &'a Trigger,
    /// Direct dependencies with their outcomes
    pub upstream: &'a [(&'a str, UpstreamOutcome)],
}

/// Gate evaluator for one run
#[derive(Debug, Clone)]
pub struct GateEvaluator {
    trigger: Trigger,
}

impl GateEvaluator {
    pub fn new(trigger: Trigger) -> Self {
        Self { trigger }
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Decide whether `stage` runs. `upstream` holds its direct dependencies,
    /// all of which must already be terminal.
    ///
    /// A malformed branch pattern or condition yields
    /// [`PipeflowError::GateEvaluation`]; the caller fails that stage only.
    pub fn evaluate(
        &self,
        stage: &Stage,
        upstream: &[(&str, UpstreamOutcome)],
    ) -> PipeflowResult<GateDecision> {
        let decision = self.decide(stage, upstream)?;
        debug!(stage = %stage.name, ?decision, "gate evaluated");
        Ok(decision)
    }

    fn decide(
        &self,
        stage: &Stage,
        upstream: &[(&str, UpstreamOutcome)],
    ) -> PipeflowResult<GateDecision> {
        if stage.on_failure == OnFailure::Propagate {
            if let Some((name, _)) = upstream.iter().find(|(_, o)| !o.satisfies()) {
                return Ok(GateDecision::Skip(SkipReason::UpstreamNotSucceeded {
                    stage: name.to_string(),
                }));
            }
        }

        let when = &stage.when;

        if !when.events.is_empty() && !when.events.contains(&self.trigger.event) {
            return Ok(GateDecision::Skip(SkipReason::EventFiltered));
        }

        let branch = self.trigger.branch();
        let gate_error = |e: PipeflowError| PipeflowError::GateEvaluation {
            stage: stage.name.clone(),
            message: e.to_string(),
        };

        if !when.branches.is_empty() && !matches_any(&when.branches, branch).map_err(gate_error)? {
            return Ok(GateDecision::Skip(SkipReason::BranchFiltered));
        }

        if matches_any(&when.branches_ignore, branch).map_err(gate_error)? {
            return Ok(GateDecision::Skip(SkipReason::BranchFiltered));
        }

        if let Some(source) = &when.expression {
            let ctx = GateContext {
                trigger: &self.trigger,
                upstream,
            };
            let allowed = Expression::parse(source)
                .and_then(|expr| expr.evaluate(&ctx))
                .map_err(|message| PipeflowError::GateEvaluation {
                    stage: stage.name.clone(),
                    message,
                })?;

            if !allowed {
                return Ok(GateDecision::Skip(SkipReason::ConditionFalse));
            }
        }

        Ok(GateDecision::Allow)
    }
}
