// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Stage secrets
//!
//! Secrets are fetched from a [`SecretProvider`] right before a stage starts
//! and held in a [`SecretLease`] that is dropped when the command ends.
//! Values stay wrapped in [`SecretString`] and never reach logs or reports:
//! captured output is masked before it is stored.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use tracing::debug;

use crate::errors::{PipeflowError, PipeflowResult};

const MASK: &str = "***";

/// Source of secret values
pub trait SecretProvider: Send + Sync {
    /// Look up a secret by name
    fn get(&self, name: &str) -> Option<SecretString>;
}

/// Reads secrets from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get(&self, name: &str) -> Option<SecretString> {
        let value = env::var(name).ok()?;
        Some(SecretString::new(value.into()))
    }
}

/// Fixed set of secrets, for embedding and tests
#[derive(Default)]
pub struct StaticSecretProvider {
    values: HashMap<String, SecretString>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.values.insert(name.into(), SecretString::new(value.into()));
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.values
            .get(name)
            .map(|value| SecretString::new(value.expose_secret().into()))
    }
}

/// Secrets held for one stage execution
pub struct SecretLease {
    stage: String,
    secrets: Vec<(String, SecretString)>,
}

impl SecretLease {
    /// Acquire every named secret, or fail on the first missing one
    pub fn acquire(
        provider: &dyn SecretProvider,
        stage: &str,
        names: &[String],
    ) -> PipeflowResult<Self> {
        let mut secrets = Vec::with_capacity(names.len());
        for name in names {
            let value = provider
                .get(name)
                .ok_or_else(|| PipeflowError::SecretUnavailable {
                    stage: stage.to_string(),
                    name: name.clone(),
                })?;
            secrets.push((name.clone(), value));
        }

        if !secrets.is_empty() {
            debug!(stage, count = secrets.len(), "secrets acquired");
        }

        Ok(Self {
            stage: stage.to_string(),
            secrets,
        })
    }

    /// A lease holding nothing
    pub fn empty(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            secrets: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Name and value pairs for the child environment
    pub fn env_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.secrets
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose_secret()))
    }

    /// Replace every secret value in `text` with `***`
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for (_, value) in &self.secrets {
            let value = value.expose_secret();
            if !value.is_empty() {
                masked = masked.replace(value, MASK);
            }
        }
        masked
    }
}

impl fmt::Debug for SecretLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.secrets.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("SecretLease")
            .field("stage", &self.stage)
            .field("names", &names)
            .finish()
    }
}

impl Drop for SecretLease {
    fn drop(&mut self) {
        if !self.secrets.is_empty() {
            debug!(stage = %self.stage, "secrets released");
        }
    }
}
