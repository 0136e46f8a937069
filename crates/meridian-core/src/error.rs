//! Error taxonomy shared by every subsystem.
//!
//! Each variant corresponds to one of the error classes in the
//! orchestrator's design: steps bubble one of these as their
//! `StepResult::Failure`, the workflow engine consults [`MeridianError::retriable`]
//! instead of re-deriving retriability at each call site, and the
//! coordinator inspects [`MeridianError::fatal`] to decide whether to
//! continue to the next task or stop the process entirely.

use thiserror::Error;

/// The full error taxonomy for the orchestrator.
#[derive(Debug, Error)]
pub enum MeridianError {
    /// YAML parse, schema, or template resolution failure. Fatal at
    /// workflow start.
    #[error("config error: {0}")]
    Config(String),

    /// Step-specific config invalid. Fatal at workflow start.
    #[error("validation error in step {step:?}: {reason}")]
    Validation { step: String, reason: String },

    /// A step's predecessor failed or was skipped in a way that
    /// invalidates it.
    #[error("step {step:?} blocked by failed dependency {dependency:?}")]
    DependencyBlocked { step: String, dependency: String },

    /// A step or persona wait exceeded its budget. Retriable per policy.
    #[error("timeout after {elapsed_ms}ms waiting for {what}")]
    Timeout { what: String, elapsed_ms: u64 },

    /// A persona responder returned `status == error`. Retriable.
    #[error("persona {persona} returned an error: {message}")]
    Persona { persona: String, message: String },

    /// Language policy guard, `.ma/`-path guard, or coverage guard
    /// violation. Never retried; aborts the workflow.
    #[error("policy violation ({guard}): {detail}")]
    PolicyViolation { guard: String, detail: String },

    /// Branch mismatch, optimistic-lock conflict, or missing task
    /// description. Never retried; aborts the workflow.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Stream append/read/ack failed. Retried a bounded number of times;
    /// persistent failure aborts the workflow.
    #[error("transport error: {0}")]
    Transport(String),

    /// Dashboard or HTTP fetch failure. Retried with exponential backoff;
    /// task-creation failures after retries abort the sub-workflow.
    #[error("external call failed: {0}")]
    External(String),
}

impl MeridianError {
    /// Whether the engine's retry policy should consider another attempt
    /// for an error of this kind. `PolicyViolation` and `Integrity` are
    /// never retried regardless of the step's own `max_attempts`.
    pub fn retriable(&self) -> bool {
        !matches!(
            self,
            MeridianError::PolicyViolation { .. } | MeridianError::Integrity(_)
        )
    }

    /// Whether this error should stop the coordinator process entirely,
    /// as opposed to aborting only the current workflow and moving on to
    /// the next task.
    pub fn fatal(&self) -> bool {
        matches!(self, MeridianError::Config(_) | MeridianError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, MeridianError>;
