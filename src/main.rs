// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! pipeflow - Pipeline Orchestrator
//!
//! Sequences build, test, scan and release stages.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeflow::cli::{Cli, Commands};
use pipeflow::report::EXIT_INTERNAL_ERROR;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose { "pipeflow=info" } else { "pipeflow=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    pipeflow::utils::configure_colors();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{:?}", report);
            EXIT_INTERNAL_ERROR
        }
    };

    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> miette::Result<i32> {
    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init {
            name,
            template,
            force,
        } => pipeflow::cli::init::run(name, template, force, cli.verbose).await,
        Commands::Run(args) => pipeflow::cli::run::run(args, cli.verbose).await,
        Commands::Validate { pipeline } => {
            pipeflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            pipeflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
    }
}
