//! Lookup table from step `type` name to implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::trait_def::Step;

/// Registered step implementations, keyed by [`Step::name`]. Stored as
/// `Arc<dyn Step>` (rather than `Box`) so the engine can clone a handle
/// into a spawned task without borrowing the registry across an `.await`.
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.steps.insert(step.name().to_string(), step);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.steps.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.list())
            .finish()
    }
}
