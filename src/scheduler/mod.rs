// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Stage scheduler
//!
//! Drives a [`PipelineRun`] from the first gate to the last completion.
//! One task owns the run state, the ready set and the concurrency lock
//! table; stage commands run on a [`JoinSet`] and their results are applied
//! back on the scheduling task only.

mod locks;
mod run;

pub use locks::ConcurrencyLocks;
pub use run::{fingerprint, PipelineRun, RunMetadata, StageLogs, StageOutcome, StageStatus};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{PipeflowError, PipeflowResult};
use crate::gate::{GateDecision, GateEvaluator, SkipReason, Trigger, UpstreamOutcome};
use crate::outputs::select_declared;
use crate::pipeline::{OnFailure, Pipeline, PipelineValidator, Stage, StageGraph};
use crate::runner::{
    CancelSignal, CommandOutput, CommandRequest, CommandRunner, EnvSecretProvider, SecretLease,
    SecretProvider,
};

/// Lines of stderr kept in a command failure
const STDERR_TAIL_LINES: usize = 20;

/// Options for one run
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Overrides `settings.max_parallel`
    pub max_parallel: Option<usize>,
    /// Evaluate gates only, run nothing
    pub dry_run: bool,
    /// Working directory for stage commands
    pub working_dir: PathBuf,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_parallel: None,
            dry_run: false,
            working_dir: PathBuf::from("."),
        }
    }
}

/// Notified as stages start and finish
pub trait RunObserver: Send + Sync {
    fn on_run_start(&self, _total: usize) {}
    fn on_stage_start(&self, _stage: &str) {}
    fn on_stage_finish(&self, _outcome: &StageOutcome) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Handle used to abort a run from outside the scheduler
#[derive(Debug, Clone)]
pub struct RunHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl RunHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Calling it again has no further effect.
    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            info!("run cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn signal(&self) -> CancelSignal {
        CancelSignal::new(self.tx.subscribe())
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

type StageResult = (usize, PipeflowResult<CommandOutput>);

/// Runs pipelines
pub struct Scheduler {
    runner: Arc<dyn CommandRunner>,
    secrets: Arc<dyn SecretProvider>,
    observer: Arc<dyn RunObserver>,
    options: SchedulerOptions,
    handle: RunHandle,
}

impl Scheduler {
    /// Create a scheduler with environment secrets and no observer
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            secrets: Arc::new(EnvSecretProvider),
            observer: Arc::new(NoopObserver),
            options: SchedulerOptions::default(),
            handle: RunHandle::new(),
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Handle that cancels runs started by this scheduler
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Run a pipeline for a trigger.
    ///
    /// Definition errors (cycles, unknown stages or outputs) are returned
    /// before any stage starts. Stage failures are recorded in the returned
    /// run, not returned as errors.
    pub async fn run(
        &self,
        pipeline: Arc<Pipeline>,
        trigger: Trigger,
    ) -> PipeflowResult<PipelineRun> {
        PipelineValidator::ensure_valid(&pipeline)?;
        let graph = Arc::new(StageGraph::build(&pipeline)?);
        let mut run = PipelineRun::new(
            Arc::clone(&pipeline),
            Arc::clone(&graph),
            trigger.clone(),
            self.options.dry_run,
        )?;

        info!(
            run_id = %run.metadata().run_id,
            pipeline = %pipeline.name,
            trigger = %trigger,
            "run started"
        );
        self.observer.on_run_start(pipeline.stages.len());

        let driver = RunDriver {
            pipeline,
            order: graph.topological_order(),
            gate: GateEvaluator::new(trigger),
            scheduler: self,
            locks: ConcurrencyLocks::new(),
            tasks: JoinSet::new(),
            abort: watch::channel(false).0,
            max_parallel: 1,
        };

        if self.options.dry_run {
            driver.plan(&mut run)?;
        } else {
            driver.execute(&mut run).await?;
        }

        run.finish();
        info!(
            run_id = %run.metadata().run_id,
            duration_ms = run.duration().as_millis() as u64,
            "run finished"
        );
        Ok(run)
    }

    fn max_parallel(&self, pipeline: &Pipeline) -> usize {
        self.options
            .max_parallel
            .or(pipeline.settings.max_parallel)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }
}

/// State of one run while the scheduler drives it
struct RunDriver<'s> {
    pipeline: Arc<Pipeline>,
    order: Vec<usize>,
    gate: GateEvaluator,
    scheduler: &'s Scheduler,
    locks: ConcurrencyLocks,
    tasks: JoinSet<StageResult>,
    /// Tells running commands to stop
    abort: watch::Sender<bool>,
    max_parallel: usize,
}

impl RunDriver<'_> {
    /// Evaluate every gate assuming dependencies succeed; run nothing
    fn plan(&self, run: &mut PipelineRun) -> PipeflowResult<()> {
        for &idx in &self.order {
            let stage = &self.pipeline.stages[idx];
            let assumed: Vec<(&str, UpstreamOutcome)> = run
                .graph()
                .upstream_of(idx)
                .iter()
                .map(|&dep| (self.pipeline.stages[dep].name.as_str(), UpstreamOutcome::Succeeded))
                .collect();

            match self.gate.evaluate(stage, &assumed) {
                Ok(GateDecision::Allow) => run.mark_queued(idx)?,
                Ok(GateDecision::Skip(reason)) => run.mark_skipped(idx, reason)?,
                Err(e) => run.mark_failed(idx, e)?,
            }
        }
        Ok(())
    }

    async fn execute(mut self, run: &mut PipelineRun) -> PipeflowResult<()> {
        self.max_parallel = self.scheduler.max_parallel(&self.pipeline);
        debug!(max_parallel = self.max_parallel, "scheduler started");

        let mut cancel = self.scheduler.handle.signal();

        loop {
            if cancel.is_cancelled() && !run.is_cancelled() {
                self.cancel(run)?;
            }

            while self.gate_ready(run)? | self.dispatch(run)? {}

            if self.tasks.is_empty() {
                if run.is_complete() {
                    return Ok(());
                }
                return Err(PipeflowError::InvariantViolation {
                    message: "no stage can make progress".to_string(),
                });
            }

            tokio::select! {
                joined = self.tasks.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (idx, result) = joined.map_err(|e| PipeflowError::InvariantViolation {
                        message: format!("stage task ended abnormally: {}", e),
                    })?;
                    self.complete(run, idx, result)?;
                }
                _ = cancel.cancelled(), if !run.is_cancelled() => {
                    self.cancel(run)?;
                }
            }
        }
    }

    /// Gate every pending stage whose dependencies are all terminal
    fn gate_ready(&mut self, run: &mut PipelineRun) -> PipeflowResult<bool> {
        let mut progressed = false;
        let pipeline = Arc::clone(&self.pipeline);

        for i in 0..self.order.len() {
            let idx = self.order[i];
            if run.status(idx) != StageStatus::Pending {
                continue;
            }

            let decision = {
                let Some(upstream) = run.upstream_outcomes(idx) else {
                    continue;
                };
                self.gate.evaluate(&pipeline.stages[idx], &upstream)
            };

            progressed = true;
            match decision {
                Ok(GateDecision::Allow) => run.mark_queued(idx)?,
                Ok(GateDecision::Skip(reason)) => {
                    info!(stage = %pipeline.stages[idx].name, %reason, "stage skipped");
                    run.mark_skipped(idx, reason)?;
                    self.scheduler.observer.on_stage_finish(run.outcome(idx));
                }
                Err(e) => self.fail(run, idx, e)?,
            }
        }

        Ok(progressed)
    }

    /// Start queued stages while workers and locks are available
    fn dispatch(&mut self, run: &mut PipelineRun) -> PipeflowResult<bool> {
        let mut progressed = false;
        let pipeline = Arc::clone(&self.pipeline);

        for i in 0..self.order.len() {
            if self.tasks.len() >= self.max_parallel {
                break;
            }

            let idx = self.order[i];
            if run.status(idx) != StageStatus::Queued {
                continue;
            }

            let stage = &pipeline.stages[idx];
            if let Some(group) = &stage.concurrency_group {
                if !self.locks.try_acquire(group, idx) {
                    debug!(stage = %stage.name, group = %group, "waiting for concurrency group");
                    continue;
                }
            }

            progressed = true;
            match self.prepare(run, stage) {
                Ok(request) => self.spawn(run, idx, stage, request)?,
                Err(e) => {
                    self.locks.release(idx);
                    self.fail(run, idx, e)?;
                }
            }
        }

        Ok(progressed)
    }

    /// Resolve inputs and secrets into a command request
    fn prepare(&self, run: &PipelineRun, stage: &Stage) -> PipeflowResult<CommandRequest> {
        let inputs = run
            .outputs()
            .resolve_inputs(stage, |name| run.status_of(name))?;
        let secrets =
            SecretLease::acquire(self.scheduler.secrets.as_ref(), &stage.name, &stage.secrets)?;

        let metadata = run.metadata();
        let mut env: BTreeMap<String, String> = self.pipeline.env.clone();
        env.extend(stage.env.clone());
        env.insert("PIPEFLOW_RUN_ID".into(), metadata.run_id.to_string());
        env.insert("PIPEFLOW_STAGE".into(), stage.name.clone());
        env.insert("PIPEFLOW_EVENT".into(), metadata.trigger.event.to_string());
        env.insert("PIPEFLOW_REF".into(), metadata.trigger.git_ref.clone());
        env.insert("PIPEFLOW_BRANCH".into(), metadata.trigger.branch().to_string());
        env.extend(inputs);

        let settings = &self.pipeline.settings;
        Ok(CommandRequest {
            stage: stage.name.clone(),
            command: stage.run.clone(),
            shell: stage.shell.clone().unwrap_or_else(|| settings.shell.clone()),
            env,
            secrets,
            working_dir: self.scheduler.options.working_dir.clone(),
            cancel: CancelSignal::new(self.abort.subscribe()),
            grace: Duration::from_secs(settings.cancel_grace_secs),
        })
    }

    fn spawn(
        &mut self,
        run: &mut PipelineRun,
        idx: usize,
        stage: &Stage,
        request: CommandRequest,
    ) -> PipeflowResult<()> {
        run.mark_running(idx)?;
        info!(stage = %stage.name, command = %stage.command_label(), "stage started");
        self.scheduler.observer.on_stage_start(&stage.name);

        let runner = Arc::clone(&self.scheduler.runner);
        let limit = stage.timeout(&self.pipeline.settings);
        let name = stage.name.clone();

        self.tasks.spawn(async move {
            let result = match limit {
                // Dropping the runner future kills the command's process group
                Some(limit) => match tokio::time::timeout(limit, runner.run(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipeflowError::Timeout {
                        stage: name,
                        timeout: limit,
                    }),
                },
                None => runner.run(request).await,
            };
            (idx, result)
        });

        Ok(())
    }

    /// Apply a finished command to the run
    fn complete(
        &mut self,
        run: &mut PipelineRun,
        idx: usize,
        result: PipeflowResult<CommandOutput>,
    ) -> PipeflowResult<()> {
        self.locks.release(idx);

        // Already skipped by a cancel or a run-level fail-fast
        if run.status(idx) != StageStatus::Running {
            debug!(stage = %run.outcome(idx).name, "ignoring result of aborted stage");
            return Ok(());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let stage = &pipeline.stages[idx];

        let output = match result {
            Ok(output) => output,
            Err(e) => return self.fail(run, idx, e),
        };

        run.record_logs(
            idx,
            StageLogs {
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
            },
            output.exit_code,
        );

        if output.success() {
            let outputs = select_declared(stage, output.outputs);
            run.mark_succeeded(idx, outputs)?;
            info!(
                stage = %stage.name,
                duration_ms = run.outcome(idx).duration().as_millis() as u64,
                "stage succeeded"
            );
            self.scheduler.observer.on_stage_finish(run.outcome(idx));
            return Ok(());
        }

        if output.cancelled {
            run.mark_skipped(idx, SkipReason::Cancelled)?;
            self.scheduler.observer.on_stage_finish(run.outcome(idx));
            return Ok(());
        }

        let error = PipeflowError::CommandFailure {
            stage: stage.name.clone(),
            exit_code: output.exit_code.unwrap_or(-1),
            stderr: tail(&output.stderr, STDERR_TAIL_LINES),
        };
        self.fail(run, idx, error)
    }

    /// Record a stage failure and apply fail-fast rules
    fn fail(
        &mut self,
        run: &mut PipelineRun,
        idx: usize,
        error: PipeflowError,
    ) -> PipeflowResult<()> {
        if error.is_fatal() {
            return Err(error);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let stage = &pipeline.stages[idx];

        if stage.is_optional() {
            warn!(stage = %stage.name, error = %error, "optional stage failed");
        } else {
            warn!(stage = %stage.name, error = %error, "stage failed");
        }
        run.mark_failed(idx, error)?;
        self.scheduler.observer.on_stage_finish(run.outcome(idx));

        if stage.is_optional() {
            return Ok(());
        }

        if let Some(group) = &stage.fail_fast_group {
            for i in 0..self.order.len() {
                let other = self.order[i];
                let candidate = &pipeline.stages[other];
                let waiting =
                    matches!(run.status(other), StageStatus::Pending | StageStatus::Queued);

                if waiting
                    && candidate.fail_fast_group.as_ref() == Some(group)
                    && candidate.on_failure != OnFailure::Always
                {
                    info!(stage = %candidate.name, group = %group, "stage skipped by fail-fast");
                    run.mark_skipped(other, SkipReason::FailFast { stage: stage.name.clone() })?;
                    self.scheduler.observer.on_stage_finish(run.outcome(other));
                }
            }
        }

        if pipeline.settings.fail_fast {
            self.abort(run, SkipReason::FailFast { stage: stage.name.clone() }, true)?;
        }

        Ok(())
    }

    /// Abort after an external cancel
    fn cancel(&mut self, run: &mut PipelineRun) -> PipeflowResult<()> {
        warn!(run_id = %run.metadata().run_id, "run cancelled");
        run.set_cancelled();
        self.abort(run, SkipReason::Cancelled, false)
    }

    /// Skip every non-terminal stage and stop running commands.
    /// `spare_always` keeps waiting `on_failure: always` stages schedulable.
    fn abort(
        &mut self,
        run: &mut PipelineRun,
        reason: SkipReason,
        spare_always: bool,
    ) -> PipeflowResult<()> {
        let pipeline = Arc::clone(&self.pipeline);

        for i in 0..self.order.len() {
            let idx = self.order[i];
            let status = run.status(idx);
            if status.is_terminal() {
                continue;
            }

            let stage = &pipeline.stages[idx];
            if spare_always
                && status != StageStatus::Running
                && stage.on_failure == OnFailure::Always
            {
                continue;
            }

            run.mark_skipped(idx, reason.clone())?;
            self.scheduler.observer.on_stage_finish(run.outcome(idx));
        }

        // Locks held by running stages are released once their task is joined
        // Stages dispatched after this point get a fresh, unfired signal
        let fired = std::mem::replace(&mut self.abort, watch::channel(false).0);
        fired.send_replace(true);
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
