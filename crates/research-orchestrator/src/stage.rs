use std::fmt;

use serde::{Deserialize, Serialize};
use valuation_core::TaskQueue;

use crate::PipelineError;

/// Where a run currently sits in the research workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Profile,
    Mine,
    Calculate,
    Review,
    ResearchTargeted,
    ResearchGeneral,
    Write,
    /// Report drafted, waiting on the reader's approval or revisions
    Feedback,
    End,
    Error,
    HumanReview,
    Abandoned,
}

/// Outcome of a stage, fed to `Stage::next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEvent {
    Profiled,
    Mined,
    Calculated,
    /// Review finished; carries the branch chosen by `route_after_review`
    Routed(Stage),
    Researched,
    Written,
    /// Report written on a run that waits for feedback before ending
    Drafted,
    Approved,
    ParametersUpdated,
    NarrativeRevised,
    Failed,
    Suspended,
    InputSupplied,
    Abandon,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Profile => "PROFILE",
            Stage::Mine => "MINE",
            Stage::Calculate => "CALCULATE",
            Stage::Review => "REVIEW",
            Stage::ResearchTargeted => "RESEARCH_TARGETED",
            Stage::ResearchGeneral => "RESEARCH_GENERAL",
            Stage::Write => "WRITE",
            Stage::Feedback => "FEEDBACK",
            Stage::End => "END",
            Stage::Error => "ERROR",
            Stage::HumanReview => "HUMAN_REVIEW",
            Stage::Abandoned => "ABANDONED",
        }
    }

    /// Validated transition. Anything not listed here is rejected.
    pub fn next(self, event: StageEvent) -> Result<Stage, PipelineError> {
        let next = match (self, event) {
            (Stage::Profile, StageEvent::Profiled) => Stage::Mine,
            (Stage::Mine, StageEvent::Mined) => Stage::Calculate,
            (Stage::Calculate, StageEvent::Calculated) => Stage::Review,
            (Stage::Review, StageEvent::Routed(target))
                if matches!(target, Stage::ResearchTargeted | Stage::ResearchGeneral) =>
            {
                target
            }
            (Stage::ResearchTargeted | Stage::ResearchGeneral, StageEvent::Researched) => {
                Stage::Write
            }
            (Stage::Write, StageEvent::Written) => Stage::End,
            (Stage::Write, StageEvent::Drafted) => Stage::Feedback,
            (Stage::Feedback, StageEvent::Approved) => Stage::End,
            (Stage::Feedback, StageEvent::ParametersUpdated) => Stage::Calculate,
            (Stage::Feedback, StageEvent::NarrativeRevised) => Stage::Write,
            (Stage::Mine | Stage::Calculate, StageEvent::Failed) => Stage::Error,
            (Stage::Error, StageEvent::Suspended) => Stage::HumanReview,
            (Stage::HumanReview, StageEvent::InputSupplied) => Stage::Mine,
            (Stage::HumanReview | Stage::Feedback, StageEvent::Abandon) => Stage::Abandoned,
            (from, event) => return Err(PipelineError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::End | Stage::Abandoned)
    }

    /// Waiting on a human; nothing runs until `Pipeline::resume`.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Stage::HumanReview | Stage::Feedback)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branch after review: targeted research when tasks were raised, general
/// market-sentiment research otherwise.
pub fn route_after_review(queue: &TaskQueue) -> Stage {
    if queue.is_empty() {
        Stage::ResearchGeneral
    } else {
        Stage::ResearchTargeted
    }
}
