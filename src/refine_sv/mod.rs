//! Refine structural variant calls by realigning a consensus of their supporting reads
//!

mod candidates;
mod orchestrator;
mod scheduler;

pub use orchestrator::{ConsensusSource, RefineParameters, RefinementOrchestrator};
pub use scheduler::{SchedulerSummary, refine_variants};
