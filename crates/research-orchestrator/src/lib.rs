//! Research run orchestration: the stage machine, resumable run state, the
//! pipeline that drives collaborators through it, and the checkpoint store.

pub mod error;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod store;

pub use error::PipelineError;
pub use pipeline::{Collaborators, Pipeline};
pub use stage::{route_after_review, Stage, StageEvent};
pub use state::{CorrectedInput, Resolution, RunFailure, RunState};
pub use store::{RunStore, RunSummary};
