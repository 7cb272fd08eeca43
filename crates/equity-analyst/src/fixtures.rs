use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use research_orchestrator::RunState;
use serde::{Deserialize, Serialize};
use tracing::debug;
use valuation_core::{
    CollaboratorError, CompanyProfile, CompanyProfiler, FilingSource, InvestigationTask,
    MarketDataSource, MarketSnapshot, RawFinancials, ReportDraft, ReportInput, ReportWriter,
    ResearchNotes, Researcher, UserDataSource, ValuationResult,
};

/// One company's offline inputs, as stored in a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    pub ticker: String,
    #[serde(default)]
    pub profile: Option<CompanyProfile>,
    #[serde(default)]
    pub financials: Option<RawFinancials>,
    /// The user's own figures, reconciled against `financials`
    #[serde(default)]
    pub user_financials: Option<RawFinancials>,
    #[serde(default)]
    pub market: Option<MarketSnapshot>,
    /// Canned research findings returned for any investigation
    #[serde(default)]
    pub research: Vec<String>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let mut fixture: Fixture = serde_json::from_str(&json)
            .with_context(|| format!("Invalid fixture {}", path.display()))?;
        fixture.ticker = fixture.ticker.trim().to_uppercase();
        Ok(fixture)
    }

    /// Rebuild the inputs a stored run last saw, so it can be resumed offline.
    pub fn from_state(state: &RunState) -> Self {
        Self {
            ticker: state.ticker.clone(),
            profile: state.profile.clone(),
            financials: state.raw.clone(),
            user_financials: state.user_raw.clone(),
            market: state.market.clone(),
            research: Vec::new(),
        }
    }
}

/// Serves every collaborator seam from in-memory fixtures.
#[derive(Debug, Default)]
pub struct FixtureDesk {
    fixtures: HashMap<String, Fixture>,
}

impl FixtureDesk {
    pub fn new(fixtures: Vec<Fixture>) -> Self {
        Self {
            fixtures: fixtures
                .into_iter()
                .map(|f| (f.ticker.to_uppercase(), f))
                .collect(),
        }
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.fixtures.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    fn fixture(&self, ticker: &str, source_name: &str) -> Result<&Fixture, CollaboratorError> {
        self.fixtures
            .get(&ticker.to_uppercase())
            .ok_or_else(|| not_found(source_name, ticker))
    }
}

fn not_found(source_name: &str, ticker: &str) -> CollaboratorError {
    CollaboratorError::NotFound {
        source_name: source_name.to_string(),
        ticker: ticker.to_string(),
    }
}

#[async_trait]
impl CompanyProfiler for FixtureDesk {
    async fn profile(&self, ticker: &str) -> Result<CompanyProfile, CollaboratorError> {
        self.fixture(ticker, "fixture profile")?
            .profile
            .clone()
            .ok_or_else(|| not_found("fixture profile", ticker))
    }
}

#[async_trait]
impl FilingSource for FixtureDesk {
    async fn financials(&self, ticker: &str) -> Result<RawFinancials, CollaboratorError> {
        self.fixture(ticker, "fixture filings")?
            .financials
            .clone()
            .ok_or_else(|| not_found("fixture filings", ticker))
    }
}

#[async_trait]
impl UserDataSource for FixtureDesk {
    async fn user_financials(
        &self,
        ticker: &str,
    ) -> Result<Option<RawFinancials>, CollaboratorError> {
        Ok(self
            .fixtures
            .get(&ticker.to_uppercase())
            .and_then(|f| f.user_financials.clone()))
    }
}

#[async_trait]
impl MarketDataSource for FixtureDesk {
    async fn snapshot(&self, ticker: &str) -> Result<MarketSnapshot, CollaboratorError> {
        self.fixture(ticker, "fixture market data")?
            .market
            .clone()
            .ok_or_else(|| not_found("fixture market data", ticker))
    }
}

#[async_trait]
impl Researcher for FixtureDesk {
    async fn investigate(
        &self,
        ticker: &str,
        tasks: &[InvestigationTask],
        _result: Option<&ValuationResult>,
    ) -> Result<ResearchNotes, CollaboratorError> {
        debug!("Offline investigation of {} ({} tasks)", ticker, tasks.len());
        let canned = self
            .fixtures
            .get(&ticker.to_uppercase())
            .map(|f| f.research.clone())
            .unwrap_or_default();

        let findings = if canned.is_empty() {
            tasks
                .iter()
                .map(|t| format!("Unresolved offline: {}", t.directive))
                .collect()
        } else {
            canned
        };

        Ok(ResearchNotes {
            summary: format!("Targeted review of {} flagged items for {}", tasks.len(), ticker),
            findings,
            targeted: true,
        })
    }

    async fn general_sentiment(&self, ticker: &str) -> Result<ResearchNotes, CollaboratorError> {
        let findings = self
            .fixtures
            .get(&ticker.to_uppercase())
            .map(|f| f.research.clone())
            .unwrap_or_default();
        Ok(ResearchNotes {
            summary: format!("No discrepancies flagged for {}", ticker),
            findings,
            targeted: false,
        })
    }
}

/// Renders the report input as plain markdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryWriter;

impl SummaryWriter {
    pub fn render(input: &ReportInput) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {} - {}", input.ticker, input.strategy.name());
        let _ = writeln!(md);

        match &input.result {
            Some(result) => {
                let _ = writeln!(md, "## Valuation");
                let _ = writeln!(md);
                let _ = writeln!(md, "| Metric | Value |");
                let _ = writeln!(md, "|---|---|");
                let _ = writeln!(md, "| Basis | {} |", result.basis.label());
                let _ = writeln!(md, "| Intrinsic value / share | {:.2} |", result.intrinsic_value_per_share);
                let _ = writeln!(md, "| Current price | {:.2} |", result.current_price);
                let _ = writeln!(md, "| Upside | {:.1}% |", result.upside_pct * 100.0);
                let _ = writeln!(md, "| Discount rate | {:.2}% |", result.discount_rate * 100.0);
                let _ = writeln!(md, "| Implied growth | {:.2}% |", result.implied_growth_rate * 100.0);
                let _ = writeln!(md, "| P/E trend | {} |", result.pe_trend.label());
                for note in &result.notes {
                    let _ = writeln!(md, "- {}", note);
                }
                let _ = writeln!(md);
            }
            None => {
                let _ = writeln!(md, "_Qualitative assessment only: no numeric valuation was produced._");
                let _ = writeln!(md);
            }
        }

        if input.requires_discrepancy_section {
            let _ = writeln!(md, "## Discrepancies");
            let _ = writeln!(md);
            for task in &input.tasks {
                let _ = writeln!(md, "- [{}] {}", task.rationale.label(), task.directive);
            }
            let _ = writeln!(md);
        }

        if let Some(research) = &input.research {
            let _ = writeln!(md, "## Research");
            let _ = writeln!(md);
            let _ = writeln!(md, "{}", research.summary);
            for finding in &research.findings {
                let _ = writeln!(md, "- {}", finding);
            }
            let _ = writeln!(md);
        }

        if !input.limitations.is_empty() {
            let _ = writeln!(md, "## Data limitations");
            let _ = writeln!(md);
            for limitation in &input.limitations {
                let _ = writeln!(md, "- {}: {}", limitation.code, limitation.message);
            }
            let _ = writeln!(md);
        }

        if !input.feedback.is_empty() {
            let _ = writeln!(md, "## Revision notes");
            let _ = writeln!(md);
            for note in &input.feedback {
                let _ = writeln!(md, "- {}", note);
            }
        }

        md
    }
}

#[async_trait]
impl ReportWriter for SummaryWriter {
    async fn write(&self, input: &ReportInput) -> Result<ReportDraft, CollaboratorError> {
        Ok(ReportDraft {
            markdown: Self::render(input),
            generated_at: Utc::now(),
        })
    }
}
