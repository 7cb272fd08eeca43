use thiserror::Error;
use valuation_core::{CollaboratorError, ValuationError};

use crate::{Stage, StageEvent};

/// Failures surfaced to the caller of the pipeline. Recoverable problems
/// never reach here: they suspend the run or degrade it instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error("Report assembly failed: {0}")]
    Report(CollaboratorError),

    #[error("Invalid transition from {from} on {event:?}")]
    InvalidTransition { from: Stage, event: StageEvent },

    #[error("Run {run_id} is at {stage}, not awaiting human review")]
    NotSuspended { run_id: String, stage: Stage },

    #[error("Run {0} has no data conflict to settle")]
    NoConflict(String),

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Run {run_id} reached {stage} without {missing}")]
    IncompleteState {
        run_id: String,
        stage: Stage,
        missing: &'static str,
    },

    #[error("Batch run for {ticker} did not finish: {reason}")]
    BatchTask { ticker: String, reason: String },

    #[error("No run store configured")]
    NoStore,

    #[error("Run store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Run state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
