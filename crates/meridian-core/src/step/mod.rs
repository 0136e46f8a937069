//! The step contract and its registry, generalized from the teacher's
//! `Harness`/`HarnessRegistry` adapter pattern.

mod registry;
mod trait_def;
mod types;

pub use registry::StepRegistry;
pub use trait_def::Step;
pub use types::{StepOutcome, StepOutcomeStatus};
