// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Run progress display
//!
//! A progress bar over the stages of a run, driven by scheduler events.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::scheduler::{RunObserver, StageOutcome, StageStatus};

/// Progress bar that follows a run
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Progress bar drawn on stderr
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Progress bar that draws nothing, for non-interactive output
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), target);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        Self { bar }
    }

    /// Stages finished so far
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Remove the bar once the run is over
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for RunProgress {
    fn on_run_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_stage_start(&self, stage: &str) {
        self.bar.println(format!("  {} {}", "→".blue(), stage));
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_finish(&self, outcome: &StageOutcome) {
        let line = match outcome.status {
            StageStatus::Succeeded => format!(
                "  {} {} ({:.2}s)",
                "✓".green(),
                outcome.name.bold(),
                outcome.duration().as_secs_f64()
            ),
            StageStatus::Failed => format!("  {} {} failed", "✗".red(), outcome.name.bold()),
            _ => format!("  {} {} (skipped)", "○".dimmed(), outcome.name.dimmed()),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{SkipReason, Trigger};
    use crate::pipeline::{EventKind, Pipeline, Settings, Stage, StageGraph};
    use crate::scheduler::PipelineRun;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_progress_counts_finished_stages() {
        let pipeline = Pipeline {
            version: "1".into(),
            name: "p".into(),
            description: None,
            settings: Settings::default(),
            env: BTreeMap::new(),
            stages: vec![Stage::new("a", "true"), Stage::new("b", "true")],
        };
        let graph = StageGraph::build(&pipeline).unwrap();
        let mut run = PipelineRun::new(
            Arc::new(pipeline),
            Arc::new(graph),
            Trigger::new(EventKind::Push, "main"),
            false,
        )
        .unwrap();
        run.mark_skipped(0, SkipReason::EventFiltered).unwrap();

        let progress = RunProgress::hidden();
        progress.on_run_start(2);
        progress.on_stage_start("a");
        progress.on_stage_finish(run.outcome(0));

        assert_eq!(progress.position(), 1);
        progress.finish();
    }
}
