use std::sync::Arc;

use insight_reviewer::InsightReviewer;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use valuation_core::{
    CollaboratorError, CompanyProfiler, DataLimitation, EngineConfig, ErrorDisposition,
    FilingSource, MarketDataSource, MarketSnapshot, RawFinancials, ReportInput, ReportWriter,
    Researcher, StrategyId, UserDataSource,
};
use valuation_engine::{Reconciliation, ValuationEngine};

use crate::{
    route_after_review, CorrectedInput, PipelineError, Resolution, RunFailure, RunState, RunStore,
    Stage, StageEvent,
};

/// External collaborators a run talks to. Everything else is pure computation.
#[derive(Clone)]
pub struct Collaborators {
    pub profiler: Arc<dyn CompanyProfiler>,
    pub filings: Arc<dyn FilingSource>,
    pub market_data: Arc<dyn MarketDataSource>,
    pub researcher: Arc<dyn Researcher>,
    pub writer: Arc<dyn ReportWriter>,
}

/// Drives runs through PROFILE -> MINE -> CALCULATE -> REVIEW -> RESEARCH -> WRITE.
pub struct Pipeline {
    collaborators: Collaborators,
    config: EngineConfig,
    store: Option<RunStore>,
    user_data: Option<Arc<dyn UserDataSource>>,
    feedback_gate: bool,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            collaborators,
            config,
            store: None,
            user_data: None,
            feedback_gate: false,
        })
    }

    /// Checkpoint every step to this store
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Reconcile every filing against the user's own financials
    pub fn with_user_data(mut self, source: Arc<dyn UserDataSource>) -> Self {
        self.user_data = Some(source);
        self
    }

    /// Park new runs at FEEDBACK once the report is written
    pub fn with_feedback_gate(mut self, enabled: bool) -> Self {
        self.feedback_gate = enabled;
        self
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    /// Start a run. An unknown strategy override fails here, before any state exists.
    pub async fn start(
        &self,
        ticker: &str,
        strategy_override: Option<&str>,
    ) -> Result<RunState, PipelineError> {
        let strategy_override = strategy_override
            .map(str::parse::<StrategyId>)
            .transpose()?;
        let mut state = RunState::new(ticker, strategy_override, self.config.clone());
        state.feedback_gate = self.feedback_gate;
        info!("Starting research run {} for {}", state.run_id, state.ticker);
        self.checkpoint(&state).await?;
        self.drive(state).await
    }

    /// Step until the run ends or waits on a human.
    pub async fn drive(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        while !state.stage.is_terminal() && !state.stage.is_suspended() {
            state = self.step(state).await?;
            self.checkpoint(&state).await?;
        }
        match state.stage {
            Stage::End => info!("Run {} for {} complete", state.run_id, state.ticker),
            Stage::HumanReview => warn!(
                "Run {} for {} awaiting human review: {}",
                state.run_id,
                state.ticker,
                state
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("no failure recorded")
            ),
            Stage::Feedback => info!(
                "Run {} for {} report ready, awaiting feedback",
                state.run_id, state.ticker
            ),
            _ => {}
        }
        Ok(state)
    }

    /// Continue a run parked at HUMAN_REVIEW or FEEDBACK. A resolution that
    /// does not answer the stage the run waits at is an invalid transition.
    pub async fn resume(
        &self,
        mut state: RunState,
        resolution: Resolution,
    ) -> Result<RunState, PipelineError> {
        if !state.stage.is_suspended() {
            return Err(PipelineError::NotSuspended {
                run_id: state.run_id,
                stage: state.stage,
            });
        }

        match resolution {
            Resolution::Supply(corrections) => {
                info!("Run {} resumed with corrected input", state.run_id);
                state.advance(StageEvent::InputSupplied)?;
                state.reset_for_retry(corrections);
                self.checkpoint(&state).await?;
                self.drive(state).await
            }
            Resolution::Choose(source) => {
                let financials = state.side(source)?;
                info!("Run {} data conflict settled with {} financials", state.run_id, source);
                state.advance(StageEvent::InputSupplied)?;
                state
                    .audit_trail
                    .push(format!("Data conflict settled in favour of {} financials", source));
                state.reset_for_retry(CorrectedInput {
                    financials: Some(financials),
                    ..CorrectedInput::default()
                });
                self.checkpoint(&state).await?;
                self.drive(state).await
            }
            Resolution::Approve => {
                info!("Run {} report approved", state.run_id);
                state.advance(StageEvent::Approved)?;
                self.checkpoint(&state).await?;
                Ok(state)
            }
            Resolution::UpdateParameters(config) => {
                config.validate()?;
                info!("Run {} recalculating with updated parameters", state.run_id);
                state.advance(StageEvent::ParametersUpdated)?;
                state.reset_for_recalculation(config);
                self.checkpoint(&state).await?;
                self.drive(state).await
            }
            Resolution::ReviseNarrative(note) => {
                info!("Run {} rewriting report: {}", state.run_id, note);
                state.advance(StageEvent::NarrativeRevised)?;
                state.feedback.push(note);
                self.checkpoint(&state).await?;
                self.drive(state).await
            }
            Resolution::Abandon => {
                info!("Run {} abandoned", state.run_id);
                state.advance(StageEvent::Abandon)?;
                self.checkpoint(&state).await?;
                Ok(state)
            }
        }
    }

    /// Load a suspended run from the store and resume it.
    pub async fn resume_run(
        &self,
        run_id: &str,
        resolution: Resolution,
    ) -> Result<RunState, PipelineError> {
        let store = self.store.as_ref().ok_or(PipelineError::NoStore)?;
        let state = store
            .load(run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;
        self.resume(state, resolution).await
    }

    /// Independent runs for many tickers, at most `concurrency` at a time.
    /// Results come back in input order, one per ticker; a run whose task
    /// panicked or was cancelled comes back as `PipelineError::BatchTask`.
    pub async fn analyze_batch(
        self: Arc<Self>,
        tickers: Vec<String>,
        concurrency: usize,
    ) -> Vec<(String, Result<RunState, PipelineError>)> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, ticker) in tickers.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                let result = pipeline.start(&ticker, None).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<RunState, PipelineError>>> =
            tickers.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Batch run task failed: {}", e),
            }
        }

        tickers
            .into_iter()
            .zip(slots)
            .map(|(ticker, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(PipelineError::BatchTask {
                        ticker: ticker.clone(),
                        reason: "run task panicked or was cancelled".to_string(),
                    })
                });
                (ticker, result)
            })
            .collect()
    }

    async fn checkpoint(&self, state: &RunState) -> Result<(), PipelineError> {
        if let Some(store) = &self.store {
            store.save(state).await?;
        }
        Ok(())
    }

    async fn step(&self, state: RunState) -> Result<RunState, PipelineError> {
        match state.stage {
            Stage::Profile => self.profile(state).await,
            Stage::Mine => self.mine(state).await,
            Stage::Calculate => self.calculate(state),
            Stage::Review => self.review(state),
            Stage::ResearchTargeted => self.research_targeted(state).await,
            Stage::ResearchGeneral => self.research_general(state).await,
            Stage::Write => self.write(state).await,
            Stage::Error => self.suspend(state),
            Stage::End | Stage::HumanReview | Stage::Feedback | Stage::Abandoned => Ok(state),
        }
    }

    /// Classify the company and fix the strategy. Profiling trouble never
    /// stops a run: it falls back to GENERAL_DCF.
    async fn profile(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let strategy = match state.strategy_override {
            Some(strategy) => {
                state
                    .audit_trail
                    .push(format!("Strategy {} set by override", strategy));
                strategy
            }
            None => match self.collaborators.profiler.profile(&state.ticker).await {
                Ok(profile) => {
                    let engine = ValuationEngine::new(state.config.clone())?;
                    let strategy = engine.select(&profile, None)?;
                    state.audit_trail.push(format!(
                        "Strategy {} selected for sector {:?}, industry {:?}",
                        strategy, profile.sector, profile.industry
                    ));
                    state.profile = Some(profile);
                    strategy
                }
                Err(e) => {
                    warn!("Profiling {} failed, using GENERAL_DCF: {}", state.ticker, e);
                    state
                        .audit_trail
                        .push(format!("Profiling failed ({}); defaulted to GENERAL_DCF", e));
                    StrategyId::GeneralDcf
                }
            },
        };
        info!("[{}] strategy {}", state.ticker, strategy);
        state.strategy = Some(strategy);
        state.advance(StageEvent::Profiled)?;
        Ok(state)
    }

    /// Fetch (or take corrected) inputs and normalize them.
    async fn mine(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let corrected = state.corrections.clone().unwrap_or_default();

        let raw = match corrected.financials {
            Some(raw) => raw,
            None => {
                let filing = match self.fetch_financials(&state.ticker).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("[{}] filings unavailable: {}", state.ticker, e);
                        state.fail(RunFailure::from_collaborator(Stage::Mine, &e))?;
                        return Ok(state);
                    }
                };
                match self.reconcile(&mut state, filing).await? {
                    Some(raw) => raw,
                    None => return Ok(state),
                }
            }
        };
        state.raw = Some(raw.clone());

        let market = match corrected.market {
            Some(market) => market,
            None => match self.fetch_snapshot(&state.ticker).await {
                Ok(market) => market,
                Err(e) => {
                    warn!("[{}] market data unavailable: {}", state.ticker, e);
                    state.fail(RunFailure::from_collaborator(Stage::Mine, &e))?;
                    return Ok(state);
                }
            },
        };

        match valuation_engine::normalize(&raw, &market) {
            Ok(record) => {
                if record.lagged {
                    info!("[{}] using fiscal-year FCF; no trailing figure", state.ticker);
                }
                state.record = Some(record);
                state.advance(StageEvent::Mined)?;
            }
            Err(e) => {
                warn!("[{}] normalization failed: {}", state.ticker, e);
                state.fail(RunFailure::from_valuation(Stage::Mine, &e))?;
            }
        }
        state.market = Some(market);
        Ok(state)
    }

    /// Weigh the filing against the user's own figures. `None` means the run
    /// is now at ERROR, either on a conflict or on unusable user figures.
    async fn reconcile(
        &self,
        state: &mut RunState,
        filing: RawFinancials,
    ) -> Result<Option<RawFinancials>, PipelineError> {
        let Some(source) = &self.user_data else {
            return Ok(Some(filing));
        };
        let user = match source.user_financials(&state.ticker).await {
            Ok(Some(user)) => user,
            Ok(None) => return Ok(Some(filing)),
            Err(e) => {
                warn!("[{}] user data unavailable, using the filing: {}", state.ticker, e);
                state
                    .audit_trail
                    .push(format!("User data unavailable ({}); filing used as is", e));
                return Ok(Some(filing));
            }
        };

        state.raw = Some(filing.clone());
        state.user_raw = Some(user.clone());
        match valuation_engine::reconcile(&filing, &user, state.config.reconciliation_tolerance) {
            Ok(Reconciliation::Agreed { variance }) => {
                state.audit_trail.push(format!(
                    "User financials within {:.1}% of the filing on revenue; user figures used",
                    variance * 100.0
                ));
                Ok(Some(user))
            }
            Ok(Reconciliation::Conflict(conflict)) => {
                warn!("[{}] {}", state.ticker, conflict.describe());
                let failure = RunFailure::from_conflict(&conflict);
                state.conflict = Some(conflict);
                state.fail(failure)?;
                Ok(None)
            }
            Err(e) => {
                warn!("[{}] user financials unusable: {}", state.ticker, e);
                state.fail(RunFailure::from_valuation(Stage::Mine, &e))?;
                Ok(None)
            }
        }
    }

    async fn fetch_financials(&self, ticker: &str) -> Result<RawFinancials, CollaboratorError> {
        self.collaborators.filings.financials(ticker).await
    }

    /// Market data is fetched fresh on every attempt, never reused from a prior one.
    async fn fetch_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, CollaboratorError> {
        self.collaborators.market_data.snapshot(ticker).await
    }

    fn calculate(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let engine = ValuationEngine::new(state.config.clone())?;
        let strategy = state.strategy.unwrap_or(StrategyId::GeneralDcf);
        let record = state.record.as_ref().ok_or_else(|| state.missing("record"))?;
        let market = state.market.as_ref().ok_or_else(|| state.missing("market"))?;

        match engine.value(strategy, record, market) {
            Ok(result) => state.result = Some(result),
            Err(e) => match e.disposition() {
                ErrorDisposition::HumanReview => {
                    state.fail(RunFailure::from_valuation(Stage::Calculate, &e))?;
                    return Ok(state);
                }
                ErrorDisposition::Degraded => {
                    warn!(
                        "[{}] continuing without a numeric valuation: {}",
                        state.ticker, e
                    );
                    state.limitations.push(DataLimitation::from_error(&e));
                }
                ErrorDisposition::FailFast => return Err(e.into()),
            },
        }
        state.strategy = Some(strategy);
        state.advance(StageEvent::Calculated)?;
        Ok(state)
    }

    fn review(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let reviewer = InsightReviewer::new(&state.config);
        if let (Some(result), Some(record)) = (&state.result, &state.record) {
            reviewer.review_into(result, record, &mut state.tasks)?;
            state.audit_trail.extend(reviewer.audit(result));
            state.audit_trail.extend(result.notes.iter().cloned());
        }
        if !state.tasks.is_empty() {
            info!(
                "[{}] {} investigation task(s) raised",
                state.ticker,
                state.tasks.len()
            );
        }
        let next = route_after_review(&state.tasks);
        state.advance(StageEvent::Routed(next))?;
        Ok(state)
    }

    async fn research_targeted(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let tasks = state.tasks.drain().to_vec();
        let outcome = self
            .collaborators
            .researcher
            .investigate(&state.ticker, &tasks, state.result.as_ref())
            .await;
        match outcome {
            Ok(notes) => state.research = Some(notes),
            Err(e) => self.research_degraded(&mut state, e),
        }
        state.advance(StageEvent::Researched)?;
        Ok(state)
    }

    async fn research_general(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        state.tasks.drain();
        let outcome = self
            .collaborators
            .researcher
            .general_sentiment(&state.ticker)
            .await;
        match outcome {
            Ok(notes) => state.research = Some(notes),
            Err(e) => self.research_degraded(&mut state, e),
        }
        state.advance(StageEvent::Researched)?;
        Ok(state)
    }

    fn research_degraded(&self, state: &mut RunState, err: CollaboratorError) {
        warn!("[{}] research unavailable: {}", state.ticker, err);
        state.limitations.push(DataLimitation {
            code: err.code().to_string(),
            message: format!("Qualitative research missing: {}", err),
            field: None,
        });
    }

    async fn write(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        let input = ReportInput {
            ticker: state.ticker.clone(),
            strategy: state.strategy.unwrap_or(StrategyId::GeneralDcf),
            result: state.result.clone(),
            tasks: state.tasks.as_slice().to_vec(),
            research: state.research.clone(),
            limitations: state.limitations.clone(),
            requires_discrepancy_section: !state.tasks.is_empty(),
            qualitative_only: state.result.is_none(),
            feedback: state.feedback.clone(),
        };
        let draft = self
            .collaborators
            .writer
            .write(&input)
            .await
            .map_err(PipelineError::Report)?;
        state.report = Some(draft);
        if state.feedback_gate {
            state.advance(StageEvent::Drafted)?;
        } else {
            state.advance(StageEvent::Written)?;
        }
        Ok(state)
    }

    fn suspend(&self, mut state: RunState) -> Result<RunState, PipelineError> {
        state.advance(StageEvent::Suspended)?;
        Ok(state)
    }
}
