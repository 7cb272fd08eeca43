use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error("Unit ambiguity: `{field}` carries no unit annotation (expected units, thousands, millions or billions)")]
    UnitAmbiguity { field: String },

    #[error("Unknown strategy: `{0}` is not a registered valuation strategy")]
    UnknownStrategy(String),

    #[error("Missing market data: `{field}` is required and no fallback applies")]
    MissingMarketData { field: String },

    #[error("Missing financial data: strategy {strategy} requires `{field}`")]
    MissingFinancialField { strategy: String, field: String },

    #[error("Invalid discount rate: {discount_rate:.4} does not exceed terminal growth {terminal_growth:.4}")]
    InvalidDiscountRate {
        discount_rate: f64,
        terminal_growth: f64,
    },

    #[error("Non-positive base: {metric} is {value:.2}, a cash-flow projection is meaningless")]
    NonPositiveBase { metric: String, value: f64 },

    #[error("Invalid input: `{field}` {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task queue is sealed: research has started draining it")]
    QueueSealed,
}

/// How the orchestration layer must react to a pure-computation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDisposition {
    /// Route to ERROR and wait for corrected input.
    HumanReview,
    /// Keep going without a numeric valuation; the report carries a data limitation.
    Degraded,
    /// Surface to the caller immediately; no run state is produced.
    FailFast,
}

impl ValuationError {
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            ValuationError::UnitAmbiguity { .. }
            | ValuationError::MissingFinancialField { .. }
            | ValuationError::InvalidInput { .. } => ErrorDisposition::HumanReview,
            ValuationError::MissingMarketData { .. }
            | ValuationError::InvalidDiscountRate { .. }
            | ValuationError::NonPositiveBase { .. } => ErrorDisposition::Degraded,
            ValuationError::UnknownStrategy(_)
            | ValuationError::InvalidConfig(_)
            | ValuationError::QueueSealed => ErrorDisposition::FailFast,
        }
    }

    /// Stable machine-readable code, persisted with failed runs.
    pub fn code(&self) -> &'static str {
        match self {
            ValuationError::UnitAmbiguity { .. } => "unit_ambiguity",
            ValuationError::UnknownStrategy(_) => "unknown_strategy",
            ValuationError::MissingMarketData { .. } => "missing_market_data",
            ValuationError::MissingFinancialField { .. } => "missing_financial_field",
            ValuationError::InvalidDiscountRate { .. } => "invalid_discount_rate",
            ValuationError::NonPositiveBase { .. } => "non_positive_base",
            ValuationError::InvalidInput { .. } => "invalid_input",
            ValuationError::InvalidConfig(_) => "invalid_config",
            ValuationError::QueueSealed => "queue_sealed",
        }
    }

    /// The offending field, when the error is about one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValuationError::UnitAmbiguity { field }
            | ValuationError::MissingMarketData { field }
            | ValuationError::MissingFinancialField { field, .. }
            | ValuationError::InvalidInput { field, .. } => Some(field),
            ValuationError::NonPositiveBase { metric, .. } => Some(metric),
            ValuationError::InvalidDiscountRate { .. } => Some("discount_rate"),
            _ => None,
        }
    }
}

/// Failure reported by an external collaborator (filings, market data, research, report).
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollaboratorError {
    #[error("{source_name} unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("{source_name} returned malformed data: {message}")]
    Malformed { source_name: String, message: String },

    #[error("No data for {ticker} from {source_name}")]
    NotFound { source_name: String, ticker: String },
}

impl CollaboratorError {
    pub fn code(&self) -> &'static str {
        match self {
            CollaboratorError::Unavailable { .. } => "collaborator_unavailable",
            CollaboratorError::Malformed { .. } => "collaborator_malformed",
            CollaboratorError::NotFound { .. } => "collaborator_not_found",
        }
    }
}
