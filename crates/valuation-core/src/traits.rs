use async_trait::async_trait;

use crate::{
    CollaboratorError, CompanyProfile, InvestigationTask, MarketSnapshot, RawFinancials,
    ReportDraft, ReportInput, ResearchNotes, ValuationResult,
};

/// Company classification (name, sector, industry) for strategy selection
#[async_trait]
pub trait CompanyProfiler: Send + Sync {
    async fn profile(&self, ticker: &str) -> Result<CompanyProfile, CollaboratorError>;
}

/// Unit-annotated financial facts extracted from filings
#[async_trait]
pub trait FilingSource: Send + Sync {
    async fn financials(&self, ticker: &str) -> Result<RawFinancials, CollaboratorError>;
}

/// Financials the user holds privately (internal models, management
/// accounts), reconciled against the filing before valuation. `Ok(None)`
/// means nothing was supplied for this ticker.
#[async_trait]
pub trait UserDataSource: Send + Sync {
    async fn user_financials(&self, ticker: &str)
        -> Result<Option<RawFinancials>, CollaboratorError>;
}

/// Point-in-time market data, fetched fresh for every run
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self, ticker: &str) -> Result<MarketSnapshot, CollaboratorError>;
}

/// Qualitative research, targeted at raised tasks or general market sentiment
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn investigate(
        &self,
        ticker: &str,
        tasks: &[InvestigationTask],
        result: Option<&ValuationResult>,
    ) -> Result<ResearchNotes, CollaboratorError>;

    async fn general_sentiment(&self, ticker: &str) -> Result<ResearchNotes, CollaboratorError>;
}

/// Report text assembly
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write(&self, input: &ReportInput) -> Result<ReportDraft, CollaboratorError>;
}
