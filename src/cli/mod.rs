// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for pipeflow.

pub mod graph;
pub mod init;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::EventKind;

/// Default pipeline definition file
pub const DEFAULT_PIPELINE: &str = ".pipeflow.yaml";

/// Pipeline orchestrator
///
/// Sequences build, test, scan and release stages with dependency ordering,
/// gating and output propagation.
#[derive(Parser, Debug)]
#[clap(
    name = "pipeflow",
    version,
    about = "Pipeline orchestrator for build, test, scan, and release stages",
    long_about = None,
    after_help = "Examples:\n\
        pipeflow init --template release            Create a release pipeline\n\
        pipeflow validate                           Check .pipeflow.yaml\n\
        pipeflow run --event push --ref main        Run the pipeline for a push\n\
        pipeflow run --dry-run --ref release/v2     Show which stages would run\n\
        pipeflow graph --format mermaid             Draw the stage graph\n\n\
        See 'pipeflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new pipeline definition
    Init {
        /// Pipeline name (defaults to current directory name)
        name: Option<String>,

        /// Use a template (basic, release)
        #[clap(short, long)]
        template: Option<String>,

        /// Overwrite an existing definition
        #[clap(short, long)]
        force: bool,
    },

    /// Run the pipeline for a trigger event
    Run(RunArgs),

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Arguments of the `run` command
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Pipeline file
    #[clap(default_value = DEFAULT_PIPELINE)]
    pub pipeline: PathBuf,

    /// Trigger event (push, pull_request, manual, schedule)
    #[clap(short, long, env = "PIPEFLOW_EVENT", default_value = "push")]
    pub event: EventKind,

    /// Git ref or branch that triggered the run
    #[clap(
        short = 'r',
        long = "ref",
        env = "PIPEFLOW_REF",
        default_value = "main",
        value_name = "REF"
    )]
    pub git_ref: String,

    /// Evaluate gates and show the plan without running anything
    #[clap(long)]
    pub dry_run: bool,

    /// Maximum number of stages running at once
    #[clap(short = 'j', long, env = "PIPEFLOW_MAX_PARALLEL", value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Write a JSON report to this file
    #[clap(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Disable the progress bar
    #[clap(long)]
    pub no_progress: bool,
}

/// Graph output format
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// Numbered execution plan
    Text,
    /// Graphviz
    Dot,
    Mermaid,
}
