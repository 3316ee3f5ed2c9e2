//! Phased execution of the feature stages.
//!
//! Phase 1 scores every race, phase 2 derives athlete features from those
//! scores, phase 3 derives course features. Stages are isolated: one failing
//! stage never stops the others.

pub mod orchestrator;
pub mod stage;
mod stages;
pub mod window;

use thiserror::Error;

use crate::storage::DatabaseError;

pub use orchestrator::{
    ConnectionProvider, Orchestrator, PhaseSummary, RunMode, RunSummary, StageFailure,
    StageOutcome,
};
pub use stage::{
    BuiltinStage, RunScope, Selection, Stage, StageContext, StageId, StageRegistry, StageReport,
    Window,
};
pub use window::WindowRequest;

/// Errors that stop a run before any stage executes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(u8),

    #[error("No race data found")]
    NoRaceData,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
