// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Init command - create a new pipeline definition

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::DEFAULT_PIPELINE;
use crate::utils::{code, print_header, print_success};

/// Run the init command
pub async fn run(
    name: Option<String>,
    template: Option<String>,
    force: bool,
    verbose: bool,
) -> Result<i32> {
    let project_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "my-project".to_string())
    });

    print_header("Initializing pipeflow pipeline");

    if Path::new(DEFAULT_PIPELINE).exists() && !force {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "{} already exists",
            DEFAULT_PIPELINE
        ));
    }

    let pipeline_content = render_template(template.as_deref(), &project_name)?;

    std::fs::write(DEFAULT_PIPELINE, &pipeline_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_PIPELINE, e))?;

    print_success(&format!("Created {}", DEFAULT_PIPELINE));

    println!();
    println!("{}", "Pipeline initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to describe your stages", code(DEFAULT_PIPELINE));
    println!("  2. Run {} to check it", code("pipeflow validate"));
    println!(
        "  3. Run {} to see what would run",
        code("pipeflow run --dry-run --event push --ref main")
    );
    println!();

    if verbose {
        println!("{}", "Generated pipeline:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", pipeline_content.dimmed());
    }

    Ok(0)
}

/// Pipeline definition for a template name
pub fn render_template(template: Option<&str>, name: &str) -> Result<String> {
    match template {
        None | Some("basic") => Ok(basic_template(name)),
        Some("release") => Ok(release_template(name)),
        Some(t) => Err(miette::miette!(
            "Unknown template: '{}'\n\nAvailable templates:\n\
             • basic    - Checkout, lint and test\n\
             • release  - Version bump, build and publish with gating",
            t
        )),
    }
}

fn basic_template(name: &str) -> String {
    format!(
        r#"# pipeflow pipeline definition
version: "1"
name: "{name}"

settings:
  timeout_secs: 1800

stages:
  - name: checkout
    run: git fetch --tags

  - name: lint
    run: cargo clippy -- -D warnings
    depends_on: [checkout]

  - name: test
    run: cargo test
    depends_on: [checkout]
    fail_fast_group: checks

# Add more stages as needed:
# - name: docs
#   run: cargo doc --no-deps
#   depends_on: [test]
#   when:
#     branches: [main]
"#
    )
}

fn release_template(name: &str) -> String {
    format!(
        r#"# pipeflow pipeline - release
version: "1"
name: "{name}"

settings:
  timeout_secs: 3600
  cancel_grace_secs: 10

stages:
  - name: checkout
    run: git fetch --tags

  - name: lint
    run: cargo clippy -- -D warnings
    depends_on: [checkout]

  - name: typecheck
    run: cargo check --all-targets
    depends_on: [checkout]

  - name: audit
    run: cargo audit
    depends_on: [checkout]
    allow_failure: true

  - name: bump-version
    run: |
      version=$(git describe --tags --abbrev=0 | sed 's/^v//')
      echo "::set-output name=version::$version"
    depends_on: [lint, typecheck]
    outputs: [version]

  - name: build
    run: cargo build --release
    inputs:
      VERSION: bump-version.version

  - name: publish
    run: cargo publish
    depends_on: [build]
    inputs:
      VERSION: bump-version.version
    secrets: [CARGO_REGISTRY_TOKEN]
    concurrency_group: release-lock
    when:
      events: [push, manual]
      branches: [main, "release/**"]

  - name: notify
    run: echo "release finished"
    depends_on: [publish]
    on_failure: continue
    when:
      if: failure() || success()
"#
    )
}
