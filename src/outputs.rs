// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Output propagation
//!
//! Stages publish named values by printing `::set-output name=<key>::<value>`.
//! Values become visible to consumers once the producer has succeeded and
//! are never overwritten afterwards.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::errors::{PipeflowError, PipeflowResult};
use crate::pipeline::{OutputRef, Stage};
use crate::scheduler::StageStatus;

/// Published outputs of a run, keyed by producing stage
#[derive(Debug, Default)]
pub struct OutputStore {
    published: HashMap<String, BTreeMap<String, String>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outputs of a succeeded stage. Each stage publishes once.
    pub fn publish(&mut self, stage: &str, values: BTreeMap<String, String>) -> PipeflowResult<()> {
        if self.published.contains_key(stage) {
            return Err(PipeflowError::OutputAlreadyPublished {
                stage: stage.to_string(),
            });
        }

        debug!(stage, keys = ?values.keys().collect::<Vec<_>>(), "outputs published");
        self.published.insert(stage.to_string(), values);
        Ok(())
    }

    /// Outputs published by a stage
    pub fn outputs_of(&self, stage: &str) -> Option<&BTreeMap<String, String>> {
        self.published.get(stage)
    }

    /// Resolve one reference for `consumer`, given the producer's status
    pub fn resolve(
        &self,
        consumer: &str,
        reference: &OutputRef,
        producer: StageStatus,
    ) -> PipeflowResult<&str> {
        let unavailable = |reason: &str| PipeflowError::OutputUnavailable {
            stage: consumer.to_string(),
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        match producer {
            StageStatus::Succeeded => self
                .published
                .get(&reference.stage)
                .and_then(|values| values.get(&reference.key))
                .map(String::as_str)
                .ok_or_else(|| unavailable("the producer never published it")),
            StageStatus::Failed => Err(unavailable("the producer failed")),
            StageStatus::Skipped => Err(unavailable("the producer was skipped")),
            StageStatus::Pending | StageStatus::Queued | StageStatus::Running => {
                Err(PipeflowError::OutputNotReady {
                    stage: consumer.to_string(),
                    reference: reference.to_string(),
                })
            }
        }
    }

    /// Resolve every input of `stage` into environment variables
    pub fn resolve_inputs<F>(
        &self,
        stage: &Stage,
        status_of: F,
    ) -> PipeflowResult<BTreeMap<String, String>>
    where
        F: Fn(&str) -> Option<StageStatus>,
    {
        stage
            .inputs
            .iter()
            .map(|(var, reference)| {
                let status =
                    status_of(&reference.stage).ok_or_else(|| PipeflowError::StageNotFound {
                        stage: reference.stage.clone(),
                    })?;
                let value = self.resolve(&stage.name, reference, status)?;
                Ok((var.clone(), value.to_string()))
            })
            .collect()
    }
}

/// Keep only the keys a stage declares, warning about the rest
pub fn select_declared(
    stage: &Stage,
    printed: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    printed
        .into_iter()
        .filter(|(key, _)| {
            let declared = stage.outputs.contains(key);
            if !declared {
                warn!(stage = %stage.name, key = %key, "dropping undeclared output");
            }
            declared
        })
        .collect()
}
