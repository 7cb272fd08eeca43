use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use valuation_core::{
    CollaboratorError, CompanyProfile, DataConflict, DataLimitation, DataSource, EngineConfig,
    FinancialRecord, MarketSnapshot, RawFinancials, ReportDraft, ResearchNotes, StrategyId,
    TaskQueue, ValuationError, ValuationResult,
};

use crate::{PipelineError, Stage, StageEvent};

/// Why a run stopped at ERROR, shown to the human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl RunFailure {
    pub fn from_valuation(stage: Stage, err: &ValuationError) -> Self {
        Self {
            stage,
            code: err.code().to_string(),
            message: err.to_string(),
            field: err.field().map(str::to_string),
        }
    }

    pub fn from_collaborator(stage: Stage, err: &CollaboratorError) -> Self {
        Self {
            stage,
            code: err.code().to_string(),
            message: err.to_string(),
            field: None,
        }
    }

    pub fn from_conflict(conflict: &DataConflict) -> Self {
        Self {
            stage: Stage::Mine,
            code: "data_conflict".to_string(),
            message: conflict.describe(),
            field: Some(conflict.field.clone()),
        }
    }
}

/// Human-supplied replacements used when a suspended run re-enters MINE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectedInput {
    #[serde(default)]
    pub financials: Option<RawFinancials>,
    #[serde(default)]
    pub market: Option<MarketSnapshot>,
    #[serde(default)]
    pub strategy_override: Option<StrategyId>,
}

/// How a human resolves a suspended run. `Supply` and `Choose` answer
/// HUMAN_REVIEW; `Approve`, `UpdateParameters` and `ReviseNarrative` answer
/// report FEEDBACK. `Abandon` answers either.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Supply(CorrectedInput),
    /// Settle a data conflict by taking one side's financials as they are
    Choose(DataSource),
    Approve,
    /// Re-value with new thresholds, then research and write again
    UpdateParameters(EngineConfig),
    /// Rewrite the report with this instruction added to the feedback
    ReviseNarrative(String),
    Abandon,
}

/// Everything one run knows. Owned by the run, handed from stage to stage by
/// value, and fully serializable so a suspended run can be resumed from its
/// persisted form alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub ticker: String,
    pub stage: Stage,
    /// Stages visited, in order
    pub path: Vec<Stage>,
    pub strategy_override: Option<StrategyId>,
    pub strategy: Option<StrategyId>,
    pub profile: Option<CompanyProfile>,
    pub corrections: Option<CorrectedInput>,
    pub raw: Option<RawFinancials>,
    /// The user's own financials, when a user data source supplied any
    #[serde(default)]
    pub user_raw: Option<RawFinancials>,
    /// Set while the run waits on a human to settle filing vs user figures
    #[serde(default)]
    pub conflict: Option<DataConflict>,
    pub market: Option<MarketSnapshot>,
    pub record: Option<FinancialRecord>,
    pub result: Option<ValuationResult>,
    pub tasks: TaskQueue,
    pub audit_trail: Vec<String>,
    pub limitations: Vec<DataLimitation>,
    pub research: Option<ResearchNotes>,
    pub report: Option<ReportDraft>,
    /// Narrative instructions from report feedback, oldest first
    #[serde(default)]
    pub feedback: Vec<String>,
    /// Stop at FEEDBACK after every report instead of ending
    #[serde(default)]
    pub feedback_gate: bool,
    pub failure: Option<RunFailure>,
    /// Thresholds in force when the run started
    pub config: EngineConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(ticker: &str, strategy_override: Option<StrategyId>, config: EngineConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            ticker: ticker.trim().to_uppercase(),
            stage: Stage::Profile,
            path: vec![Stage::Profile],
            strategy_override,
            strategy: None,
            profile: None,
            corrections: None,
            raw: None,
            user_raw: None,
            conflict: None,
            market: None,
            record: None,
            result: None,
            tasks: TaskQueue::new(),
            audit_trail: Vec::new(),
            limitations: Vec::new(),
            research: None,
            report: None,
            feedback: Vec::new(),
            feedback_gate: false,
            failure: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, event: StageEvent) -> Result<(), PipelineError> {
        let next = self.stage.next(event)?;
        debug!("[{}] {} -> {} ({:?})", self.ticker, self.stage, next, event);
        self.stage = next;
        self.path.push(next);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure and move to ERROR.
    pub fn fail(&mut self, failure: RunFailure) -> Result<(), PipelineError> {
        self.failure = Some(failure);
        self.advance(StageEvent::Failed)
    }

    /// Drop everything derived from the previous attempt's inputs.
    pub(crate) fn reset_for_retry(&mut self, corrections: CorrectedInput) {
        if let Some(strategy) = corrections.strategy_override {
            self.strategy_override = Some(strategy);
            self.strategy = Some(strategy);
        }
        self.corrections = Some(corrections);
        self.raw = None;
        self.user_raw = None;
        self.conflict = None;
        self.market = None;
        self.record = None;
        self.result = None;
        self.tasks = TaskQueue::new();
        self.limitations.clear();
        self.audit_trail
            .push("Resumed after human review with corrected input".to_string());
        self.failure = None;
    }

    /// Financials for the side a human picked in a data conflict.
    pub(crate) fn side(&self, source: DataSource) -> Result<RawFinancials, PipelineError> {
        if self.conflict.is_none() {
            return Err(PipelineError::NoConflict(self.run_id.clone()));
        }
        let raw = match source {
            DataSource::Filing => self.raw.as_ref(),
            DataSource::User => self.user_raw.as_ref(),
        };
        raw.cloned().ok_or_else(|| self.missing("conflicting financials"))
    }

    /// Keep the normalized record, drop everything the valuation produced.
    pub(crate) fn reset_for_recalculation(&mut self, config: EngineConfig) {
        self.config = config;
        self.result = None;
        self.tasks = TaskQueue::new();
        self.limitations.clear();
        self.research = None;
        self.report = None;
        self.audit_trail
            .push("Recalculating with updated parameters after report feedback".to_string());
    }

    pub(crate) fn missing(&self, what: &'static str) -> PipelineError {
        PipelineError::IncompleteState {
            run_id: self.run_id.clone(),
            stage: self.stage,
            missing: what,
        }
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run() {
        let state = RunState::new(" aapl ", None, EngineConfig::default());
        assert_eq!(state.ticker, "AAPL");
        assert_eq!(state.stage, Stage::Profile);
        assert!(state.tasks.is_empty());
        assert!(Uuid::parse_str(&state.run_id).is_ok());
    }

    #[test]
    fn test_advance_records_path() {
        let mut state = RunState::new("AAPL", None, EngineConfig::default());
        state.advance(StageEvent::Profiled).unwrap();
        state.advance(StageEvent::Mined).unwrap();
        assert_eq!(state.path, vec![Stage::Profile, Stage::Mine, Stage::Calculate]);
        assert!(state.advance(StageEvent::Written).is_err());
        assert_eq!(state.stage, Stage::Calculate);
    }

    #[test]
    fn test_json_round_trip_keeps_failure() {
        let mut state = RunState::new("JPM", Some(StrategyId::BankDdm), EngineConfig::default());
        state.advance(StageEvent::Profiled).unwrap();
        let err = ValuationError::UnitAmbiguity { field: "unit".into() };
        state.fail(RunFailure::from_valuation(Stage::Mine, &err)).unwrap();

        let restored = RunState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(restored, state);
        let failure = restored.failure.unwrap();
        assert_eq!(failure.code, "unit_ambiguity");
        assert_eq!(failure.field.as_deref(), Some("unit"));
    }

    #[test]
    fn test_state_without_newer_fields_still_loads() {
        let state = RunState::new("AAPL", None, EngineConfig::default());
        let mut json: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        let fields = json.as_object_mut().unwrap();
        for key in ["user_raw", "conflict", "feedback", "feedback_gate"] {
            fields.remove(key);
        }
        let restored = RunState::from_json(&json.to_string()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_side_requires_a_conflict() {
        let state = RunState::new("AAPL", None, EngineConfig::default());
        assert!(matches!(
            state.side(DataSource::Filing),
            Err(PipelineError::NoConflict(_))
        ));
    }
}
