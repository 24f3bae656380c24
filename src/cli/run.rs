// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Run command - execute the pipeline for a trigger

use colored::Colorize;
use miette::Result;
use std::io::IsTerminal;
use std::sync::Arc;

use super::RunArgs;
use crate::errors::RecoverySuggestion;
use crate::gate::Trigger;
use crate::pipeline::{CommandSpec, Pipeline, PipelineValidator};
use crate::report::{ConsoleSink, JsonFileSink, ReportSink, RunReport};
use crate::runner::ShellRunner;
use crate::scheduler::{PipelineRun, Scheduler, SchedulerOptions, StageStatus};
use crate::utils::{print_error, print_info, print_warning, RunProgress};

/// Run the pipeline and return the process exit code
pub async fn run(args: RunArgs, verbose: bool) -> Result<i32> {
    let pipeline = Pipeline::from_file(&args.pipeline)?;

    let validation = PipelineValidator::validate(&pipeline);
    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            print_error(error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            print_warning(warning);
        }
        eprintln!();
    }

    if !args.dry_run {
        check_shells(&pipeline)?;
    }

    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let quiet = args.no_progress || args.dry_run || !std::io::stderr().is_terminal();
    let progress = Arc::new(if quiet {
        RunProgress::hidden()
    } else {
        RunProgress::new()
    });

    let options = SchedulerOptions {
        max_parallel: args.max_parallel,
        dry_run: args.dry_run,
        working_dir,
    };
    let scheduler = Scheduler::new(Arc::new(ShellRunner::new()))
        .with_options(options)
        .with_observer(progress.clone());

    // Ctrl-C cancels the run; a second Ctrl-C is left to the default handler
    let handle = scheduler.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let trigger = Trigger::new(args.event, args.git_ref);
    let result = scheduler.run(Arc::new(pipeline), trigger).await;
    interrupt.abort();
    progress.finish();

    let run = match result {
        Ok(run) => run,
        Err(e) => {
            if verbose {
                if let Some(suggestion) = RecoverySuggestion::for_error(&e) {
                    eprintln!("{}", suggestion);
                }
            }
            return Err(e.into());
        }
    };

    let report = RunReport::from_run(&run);
    ConsoleSink::new(verbose).emit(&report)?;

    if let Some(path) = &args.report {
        JsonFileSink::new(path).emit(&report)?;
        print_info(&format!("Report written to {}", path.display()));
    }

    if verbose {
        print_failures(&run);
    }

    Ok(report.exit_code())
}

/// Make sure every shell used by a script stage exists
fn check_shells(pipeline: &Pipeline) -> Result<()> {
    let mut shells: Vec<&str> = pipeline
        .stages
        .iter()
        .filter(|stage| matches!(stage.run, CommandSpec::Script(_)))
        .map(|stage| stage.shell.as_deref().unwrap_or(&pipeline.settings.shell))
        .collect();
    shells.sort_unstable();
    shells.dedup();

    for shell in shells {
        ShellRunner::locate(shell)?;
    }
    Ok(())
}

/// Print captured stderr and recovery hints for failed stages
fn print_failures(run: &PipelineRun) {
    for outcome in run.outcomes() {
        if outcome.status != StageStatus::Failed {
            continue;
        }

        eprintln!();
        eprintln!("{}", format!("Stage '{}' failed:", outcome.name).red().bold());
        if !outcome.logs.stderr.is_empty() {
            eprintln!("{}", outcome.logs.stderr.dimmed());
        }
        if let Some(suggestion) = outcome.error.as_ref().and_then(RecoverySuggestion::for_error) {
            eprintln!("{}", suggestion);
        }
    }
}
