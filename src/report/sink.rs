// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Report sinks

use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use super::{RunReport, RunStatus, StageSummary};
use crate::errors::{PipeflowError, PipeflowResult};
use crate::scheduler::StageStatus;

/// Destination for a finished report
pub trait ReportSink {
    fn emit(&self, report: &RunReport) -> PipeflowResult<()>;
}

/// Prints a colored summary to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Render the summary as text
    pub fn render(&self, report: &RunReport) -> String {
        let mut out = String::new();
        let width = report
            .stages
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0);

        let title = if report.dry_run {
            format!("Plan for '{}' ({})", report.pipeline, report.trigger)
        } else {
            format!("Run '{}' ({})", report.pipeline, report.trigger)
        };
        out.push_str(&format!("{}\n", title.bold()));

        for stage in &report.stages {
            out.push_str(&format!(
                "  {} {:<width$}  {}\n",
                symbol(stage),
                stage.name,
                detail(stage, report.dry_run),
                width = width
            ));
        }

        out.push('\n');
        let headline = report.headline();
        let headline = match report.status {
            RunStatus::Succeeded => headline.green().bold(),
            RunStatus::PartialSuccess => headline.yellow().bold(),
            RunStatus::Failed | RunStatus::Cancelled => headline.red().bold(),
        };
        out.push_str(&format!(
            "{} in {:.2}s\n",
            headline,
            report.duration_ms as f64 / 1000.0
        ));

        if self.verbose {
            let short = &report.fingerprint[..12.min(report.fingerprint.len())];
            let footer = format!("run {} · fingerprint {}", report.run_id, short);
            out.push_str(&format!("{}\n", footer.dimmed()));
        }

        out
    }
}

impl ReportSink for ConsoleSink {
    fn emit(&self, report: &RunReport) -> PipeflowResult<()> {
        print!("{}", self.render(report));
        Ok(())
    }
}

fn symbol(stage: &StageSummary) -> colored::ColoredString {
    match stage.status {
        StageStatus::Succeeded => "✓".green(),
        StageStatus::Failed if stage.optional => "✗".yellow(),
        StageStatus::Failed => "✗".red(),
        StageStatus::Skipped => "○".dimmed(),
        StageStatus::Queued => "→".blue(),
        StageStatus::Pending | StageStatus::Running => "?".dimmed(),
    }
}

fn detail(stage: &StageSummary, dry_run: bool) -> String {
    match stage.status {
        StageStatus::Succeeded => format!("{:.2}s", stage.duration_ms as f64 / 1000.0),
        StageStatus::Failed => {
            let mut text = stage.error.clone().unwrap_or_else(|| "failed".to_string());
            if stage.optional {
                text.push_str(" (allowed to fail)");
            }
            text.red().to_string()
        }
        StageStatus::Skipped => match &stage.skip_reason {
            Some(reason) => format!("skipped: {}", reason).dimmed().to_string(),
            None => "skipped".dimmed().to_string(),
        },
        StageStatus::Queued if dry_run => "would run".to_string(),
        status => status.to_string(),
    }
}

/// Writes the report as pretty JSON
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonFileSink {
    fn emit(&self, report: &RunReport) -> PipeflowResult<()> {
        let json = report.to_json()?;
        fs::write(&self.path, json).map_err(|e| PipeflowError::FileWriteError {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{SkipReason, Trigger};
    use crate::pipeline::EventKind;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn summary(name: &str, status: StageStatus) -> StageSummary {
        StageSummary {
            name: name.into(),
            status,
            optional: false,
            skip_reason: None,
            duration_ms: 1500,
            exit_code: None,
            error: None,
            error_kind: None,
            outputs: BTreeMap::new(),
        }
    }

    fn report() -> RunReport {
        let mut skipped = summary("publish", StageStatus::Skipped);
        skipped.skip_reason = Some(SkipReason::BranchFiltered);

        RunReport {
            run_id: Uuid::nil(),
            pipeline: "release".into(),
            trigger: Trigger::new(EventKind::Push, "main"),
            started_at: Utc::now(),
            fingerprint: "0123456789abcdef".into(),
            dry_run: false,
            status: RunStatus::Succeeded,
            duration_ms: 2000,
            stages: vec![summary("build", StageStatus::Succeeded), skipped],
        }
    }

    #[test]
    fn test_console_render() {
        colored::control::set_override(false);
        let text = ConsoleSink::new(false).render(&report());

        assert!(text.contains("Run 'release' (push on main)"));
        assert!(text.contains("✓ build    1.50s"));
        assert!(text.contains("○ publish  skipped: branch not selected"));
        assert!(text.contains("succeeded: 1 succeeded, 0 failed, 1 skipped in 2.00s"));
    }

    #[test]
    fn test_json_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        JsonFileSink::new(&path).emit(&report()).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["pipeline"], "release");
        assert_eq!(written["stages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_json_file_sink_bad_path() {
        let err = JsonFileSink::new("/nonexistent-dir/for/sure/report.json")
            .emit(&report())
            .unwrap_err();
        assert!(matches!(err, PipeflowError::FileWriteError { .. }));
    }
}
