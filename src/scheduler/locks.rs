// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Concurrency-group lock table
//!
//! At most one stage per concurrency group runs at a time. The table is
//! owned by the scheduling task, so plain maps are enough.

use std::collections::HashMap;
use tracing::debug;

/// Which stage currently holds each concurrency group
#[derive(Debug, Default)]
pub struct ConcurrencyLocks {
    holders: HashMap<String, usize>,
}

impl ConcurrencyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `group` is free
    pub fn is_free(&self, group: &str) -> bool {
        !self.holders.contains_key(group)
    }

    /// Take `group` for `stage`. Returns false if another stage holds it.
    pub fn try_acquire(&mut self, group: &str, stage: usize) -> bool {
        match self.holders.get(group) {
            Some(&holder) => holder == stage,
            None => {
                debug!(group, stage, "concurrency lock acquired");
                self.holders.insert(group.to_string(), stage);
                true
            }
        }
    }

    /// Release whatever `stage` holds
    pub fn release(&mut self, stage: usize) {
        self.holders.retain(|group, holder| {
            let keep = *holder != stage;
            if !keep {
                debug!(group = %group, stage, "concurrency lock released");
            }
            keep
        });
    }

    pub fn holder(&self, group: &str) -> Option<usize> {
        self.holders.get(group).copied()
    }

    pub fn held(&self) -> usize {
        self.holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_is_exclusive() {
        let mut locks = ConcurrencyLocks::new();
        assert!(locks.try_acquire("release-lock", 1));
        assert!(!locks.try_acquire("release-lock", 2));
        assert_eq!(locks.holder("release-lock"), Some(1));

        locks.release(1);
        assert!(locks.is_free("release-lock"));
        assert!(locks.try_acquire("release-lock", 2));
    }

    #[test]
    fn test_reacquire_by_holder() {
        let mut locks = ConcurrencyLocks::new();
        assert!(locks.try_acquire("deploy", 3));
        assert!(locks.try_acquire("deploy", 3));
        assert_eq!(locks.held(), 1);
    }

    #[test]
    fn test_groups_are_independent() {
        let mut locks = ConcurrencyLocks::new();
        assert!(locks.try_acquire("a", 0));
        assert!(locks.try_acquire("b", 1));

        locks.release(0);
        assert!(locks.is_free("a"));
        assert_eq!(locks.holder("b"), Some(1));
    }
}
