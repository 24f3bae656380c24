// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::pipeline::{Pipeline, PipelineValidator, StageGraph};
use crate::utils::{print_error, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<i32> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let pipeline = match Pipeline::from_file(&pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            print_error("Failed to parse pipeline");
            eprintln!();
            return Err(e.into());
        }
    };

    print_success("Pipeline file parsed");

    let validation = PipelineValidator::validate(&pipeline);

    if !validation.errors.is_empty() {
        print_section("Errors");
        for error in &validation.errors {
            print_error(error);
        }
    }

    if !validation.warnings.is_empty() {
        print_section("Warnings");
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose && validation.is_valid() {
        print_section("Pipeline summary");
        println!("  Name: {}", pipeline.name);
        println!("  Stages: {}", pipeline.stages.len());
        if let Ok(graph) = StageGraph::build(&pipeline) {
            println!("  Order: {}", graph.topological_order_names().join(" → "));
        }
        for stage in &pipeline.stages {
            let deps = stage.upstream_names();
            let deps = if deps.is_empty() {
                String::new()
            } else {
                format!(" [depends: {}]", deps.join(", "))
            };
            println!("    - {} ({}){}", stage.name, stage.command_label(), deps.dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }
    Ok(0)
}
