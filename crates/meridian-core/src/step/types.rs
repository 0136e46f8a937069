//! Types shared by every [`super::Step`] implementation.

use std::collections::HashMap;

use serde_json::Value;

/// What a step produced: how the workflow engine decides downstream
/// dependency readiness, context outputs, and abort propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcomeStatus {
    Success,
    Failure,
}

/// The full result of running a step once.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepOutcomeStatus,
    /// Whether this failure should immediately abort the whole workflow,
    /// bypassing any remaining retry attempts.
    pub abort: bool,
    /// The step's full result object, exposed to templates as
    /// `${step_name.field}`. Declared `outputs` are additionally copied
    /// into the context root by the engine.
    pub result: HashMap<String, Value>,
}

impl StepOutcome {
    pub fn success(result: HashMap<String, Value>) -> Self {
        Self {
            status: StepOutcomeStatus::Success,
            abort: false,
            result,
        }
    }

    pub fn failure(result: HashMap<String, Value>) -> Self {
        Self {
            status: StepOutcomeStatus::Failure,
            abort: false,
            result,
        }
    }

    pub fn failure_abort(result: HashMap<String, Value>) -> Self {
        Self {
            status: StepOutcomeStatus::Failure,
            abort: true,
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepOutcomeStatus::Success
    }
}
