use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::ValuationError;

/// Scale a filing reports its figures in. Deserializes from free-text annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Magnitude {
    Units,
    Thousands,
    Millions,
    Billions,
}

impl Magnitude {
    /// Exact multiplier from this magnitude to absolute currency units.
    pub fn factor(&self) -> Decimal {
        match self {
            Magnitude::Units => Decimal::ONE,
            Magnitude::Thousands => Decimal::from(1_000_i64),
            Magnitude::Millions => Decimal::from(1_000_000_i64),
            Magnitude::Billions => Decimal::from(1_000_000_000_i64),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Magnitude::Units => "units",
            Magnitude::Thousands => "thousands",
            Magnitude::Millions => "millions",
            Magnitude::Billions => "billions",
        }
    }
}

impl FromStr for Magnitude {
    type Err = ValuationError;

    /// Parses free-text unit annotations such as "USD millions", "in thousands", "M" or "bn".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        for token in lowered.split(|c: char| !c.is_ascii_alphanumeric()) {
            let magnitude = match token {
                "units" | "unit" | "ones" | "absolute" => Magnitude::Units,
                "thousands" | "thousand" | "k" | "000s" => Magnitude::Thousands,
                "millions" | "million" | "m" | "mm" | "mn" => Magnitude::Millions,
                "billions" | "billion" | "b" | "bn" => Magnitude::Billions,
                _ => continue,
            };
            return Ok(magnitude);
        }
        Err(ValuationError::UnitAmbiguity {
            field: "unit".to_string(),
        })
    }
}

impl TryFrom<String> for Magnitude {
    type Error = ValuationError;

    fn try_from(annotation: String) -> Result<Self, Self::Error> {
        annotation.parse()
    }
}

/// An annotation that names no magnitude (e.g. "USD") loads as `None` so the
/// normalizer reports it as a unit ambiguity.
fn unit_annotation<'de, D>(deserializer: D) -> Result<Option<Magnitude>, D::Error>
where
    D: Deserializer<'de>,
{
    let annotation = Option::<String>::deserialize(deserializer)?;
    Ok(annotation.and_then(|a| a.parse().ok()))
}

fn default_source() -> String {
    "Unknown".to_string()
}

/// Financial facts as delivered by the data-acquisition collaborator, still in the
/// magnitude the filing reports them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinancials {
    pub fiscal_year: String,
    #[serde(default, deserialize_with = "unit_annotation")]
    pub unit: Option<Magnitude>,
    pub total_revenue: Decimal,
    pub net_income: Decimal,
    #[serde(default)]
    pub normalized_income: Option<Decimal>,
    pub operating_cash_flow: Decimal,
    pub capital_expenditures: Decimal,
    /// REIT FFO add-back
    #[serde(default)]
    pub depreciation_amortization: Option<Decimal>,
    /// REIT FFO deduction
    #[serde(default)]
    pub gain_on_sale: Option<Decimal>,
    /// Bank DDM base
    #[serde(default)]
    pub dividends_paid: Option<Decimal>,
    #[serde(default)]
    pub shareholders_equity: Option<Decimal>,
    #[serde(default = "default_source")]
    pub source: String,
}

impl RawFinancials {
    /// Re-express every figure in `target` magnitude. Fails when the current unit is unknown.
    pub fn expressed_in(&self, target: Magnitude) -> Result<Self, ValuationError> {
        let from = self.unit.ok_or_else(|| ValuationError::UnitAmbiguity {
            field: "unit".to_string(),
        })?;
        let convert = |field: &str, value: Decimal| {
            value
                .checked_mul(from.factor())
                .and_then(|scaled| scaled.checked_div(target.factor()))
                .ok_or_else(|| ValuationError::InvalidInput {
                    field: field.to_string(),
                    reason: "exceeds representable range".to_string(),
                })
        };
        let convert_opt =
            |field: &str, value: Option<Decimal>| value.map(|v| convert(field, v)).transpose();

        Ok(Self {
            fiscal_year: self.fiscal_year.clone(),
            unit: Some(target),
            total_revenue: convert("total_revenue", self.total_revenue)?,
            net_income: convert("net_income", self.net_income)?,
            normalized_income: convert_opt("normalized_income", self.normalized_income)?,
            operating_cash_flow: convert("operating_cash_flow", self.operating_cash_flow)?,
            capital_expenditures: convert("capital_expenditures", self.capital_expenditures)?,
            depreciation_amortization: convert_opt(
                "depreciation_amortization",
                self.depreciation_amortization,
            )?,
            gain_on_sale: convert_opt("gain_on_sale", self.gain_on_sale)?,
            dividends_paid: convert_opt("dividends_paid", self.dividends_paid)?,
            shareholders_equity: convert_opt("shareholders_equity", self.shareholders_equity)?,
            source: self.source.clone(),
        })
    }
}

/// Which financials win when the filing and the user's own figures disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Filing,
    User,
}

impl DataSource {
    pub fn label(&self) -> &'static str {
        match self {
            DataSource::Filing => "filing",
            DataSource::User => "user",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DataSource {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filing" | "sec" => Ok(DataSource::Filing),
            "user" => Ok(DataSource::User),
            other => Err(ValuationError::InvalidInput {
                field: "source".to_string(),
                reason: format!("`{}` is neither filing nor user", other),
            }),
        }
    }
}

/// A figure the filing and the user-supplied financials disagree on, both in
/// absolute units. `variance` is relative to the filing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConflict {
    pub field: String,
    pub filing: Decimal,
    pub user: Decimal,
    pub variance: f64,
}

impl DataConflict {
    pub fn describe(&self) -> String {
        format!(
            "{} mismatch: filing says {}, user says {} (diff {:.1}%)",
            self.field,
            self.filing,
            self.user,
            self.variance * 100.0
        )
    }
}

/// Where the free-cash-flow base came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FcfSource {
    /// Trailing twelve months from the market snapshot
    Trailing,
    /// Operating cash flow minus capex from the filing
    FiscalYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeCashFlow {
    pub value: f64,
    pub source: FcfSource,
}

/// Normalized, time-consistent financial record. Every monetary field is in absolute
/// currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub fiscal_year: String,
    pub total_revenue: Decimal,
    pub net_income: Decimal,
    pub normalized_income: Option<Decimal>,
    pub operating_cash_flow: Decimal,
    /// Positive outflow, whatever sign the filing used
    pub capital_expenditures: Decimal,
    pub depreciation_amortization: Option<Decimal>,
    pub gain_on_sale: Option<Decimal>,
    pub dividends_paid: Option<Decimal>,
    pub shareholders_equity: Option<Decimal>,
    pub free_cash_flow: FreeCashFlow,
    /// True when the FCF base is fiscal-year data because no trailing figure existed
    pub lagged: bool,
    pub normalized_flag: bool,
    /// (normalized - GAAP) / |GAAP|
    pub income_delta_pct: Option<f64>,
    pub source: String,
}

impl FinancialRecord {
    pub fn fiscal_year_fcf(&self) -> Decimal {
        self.operating_cash_flow - self.capital_expenditures
    }

    /// Earnings used for valuation: normalized when available, GAAP otherwise.
    pub fn earnings(&self) -> Decimal {
        self.normalized_income.unwrap_or(self.net_income)
    }

    /// Whether a strategy-required field is populated.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "depreciation_amortization" => self.depreciation_amortization.is_some(),
            "gain_on_sale" => self.gain_on_sale.is_some(),
            "dividends_paid" => self.dividends_paid.is_some(),
            "shareholders_equity" => self.shareholders_equity.is_some(),
            "normalized_income" => self.normalized_income.is_some(),
            _ => true,
        }
    }
}

/// Point-in-time market data. Refreshed every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub market_cap: f64,
    #[serde(default)]
    pub shares_outstanding: Option<f64>,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    #[serde(default)]
    pub peg_ratio: Option<f64>,
    #[serde(default)]
    pub trailing_pe: Option<f64>,
    #[serde(default)]
    pub trailing_free_cash_flow: Option<f64>,
    /// Year-over-year revenue growth as a fraction
    #[serde(default)]
    pub revenue_growth: Option<f64>,
    #[serde(default)]
    pub total_debt: Option<f64>,
    #[serde(default)]
    pub cash_and_equivalents: Option<f64>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    pub fn new(current_price: f64, market_cap: f64) -> Self {
        Self {
            current_price,
            market_cap,
            shares_outstanding: None,
            beta: None,
            risk_free_rate: None,
            peg_ratio: None,
            trailing_pe: None,
            trailing_free_cash_flow: None,
            revenue_growth: None,
            total_debt: None,
            cash_and_equivalents: None,
            as_of: None,
        }
    }
}

/// Direction of earnings multiple from fiscal year to trailing twelve months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeTrend {
    Improving,
    Stable,
    Declining,
}

impl PeTrend {
    pub fn label(&self) -> &'static str {
        match self {
            PeTrend::Improving => "IMPROVING",
            PeTrend::Stable => "STABLE",
            PeTrend::Declining => "DECLINING",
        }
    }
}

/// How the projection growth rate was inferred
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowthSource {
    PegImplied { pe: f64, peg: f64 },
    PeTier { pe: f64 },
    SustainableGrowth { roe: f64, retention: f64 },
    RevenueGrowth,
    Default,
}

/// Closed set of valuation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyId {
    #[serde(rename = "GENERAL_DCF")]
    GeneralDcf,
    #[serde(rename = "BANK_DDM")]
    BankDdm,
    #[serde(rename = "REIT_NAV")]
    ReitNav,
    #[serde(rename = "SAAS_RULE_OF_40")]
    SaasRuleOf40,
}

impl StrategyId {
    pub const ALL: [StrategyId; 4] = [
        StrategyId::GeneralDcf,
        StrategyId::BankDdm,
        StrategyId::ReitNav,
        StrategyId::SaasRuleOf40,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::GeneralDcf => "GENERAL_DCF",
            StrategyId::BankDdm => "BANK_DDM",
            StrategyId::ReitNav => "REIT_NAV",
            StrategyId::SaasRuleOf40 => "SAAS_RULE_OF_40",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyId::GeneralDcf => "General Multi-Stage DCF",
            StrategyId::BankDdm => "Bank Dividend Discount Model",
            StrategyId::ReitNav => "REIT NAV / P-FFO Model",
            StrategyId::SaasRuleOf40 => "SaaS Rule of 40",
        }
    }

    /// What kind of company the strategy fits
    pub fn description(&self) -> &'static str {
        match self {
            StrategyId::GeneralDcf => {
                "Manufacturing, services, technology and consumer companies with stable operating cash flow and a standard capital structure."
            }
            StrategyId::BankDdm => {
                "Banks, insurers and traditional financial institutions whose balance sheet is the business; valued on dividends."
            }
            StrategyId::ReitNav => {
                "Real estate investment trusts, where depreciation distorts net income; valued on funds from operations."
            }
            StrategyId::SaasRuleOf40 => {
                "High-growth software companies, often unprofitable; valued on growth plus free-cash-flow margin."
            }
        }
    }

    /// Record fields the strategy cannot run without, beyond the common ones
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            StrategyId::GeneralDcf => &[],
            StrategyId::BankDdm => &["dividends_paid"],
            StrategyId::ReitNav => &["depreciation_amortization"],
            StrategyId::SaasRuleOf40 => &[],
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_uppercase().replace(['-', ' '], "_");
        match key.as_str() {
            "GENERAL_DCF" => Ok(StrategyId::GeneralDcf),
            "BANK_DDM" => Ok(StrategyId::BankDdm),
            "REIT_NAV" => Ok(StrategyId::ReitNav),
            "SAAS_RULE_OF_40" | "SAAS_RULE40" => Ok(StrategyId::SaasRuleOf40),
            _ => Err(ValuationError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Figure a model capitalized into equity value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationBasis {
    #[default]
    FreeCashFlow,
    /// Normalized (or GAAP) net income discounted at the cost of equity
    Earnings,
    /// Mean of the free-cash-flow and earnings tracks
    Blended,
    Dividends,
    FundsFromOperations,
    Revenue,
}

impl ValuationBasis {
    pub fn label(&self) -> &'static str {
        match self {
            ValuationBasis::FreeCashFlow => "free cash flow",
            ValuationBasis::Earnings => "earnings",
            ValuationBasis::Blended => "free cash flow and earnings",
            ValuationBasis::Dividends => "dividends",
            ValuationBasis::FundsFromOperations => "funds from operations",
            ValuationBasis::Revenue => "revenue",
        }
    }
}

/// Output of one valuation run. Built once by the engine, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub strategy: StrategyId,
    pub pe_ratio_fy: Option<f64>,
    pub pe_ratio_ttm: Option<f64>,
    pub pe_trend: PeTrend,
    pub net_profit_margin: Option<f64>,
    /// Final discount rate: max(CAPM, hurdle)
    pub discount_rate: f64,
    pub capm_rate: f64,
    pub hurdle_rate: f64,
    pub implied_growth_rate: f64,
    pub growth_source: GrowthSource,
    pub growth_calibrated: bool,
    pub fcf_source: FcfSource,
    #[serde(default)]
    pub basis: ValuationBasis,
    pub lagged: bool,
    pub projected_cash_flows: Vec<f64>,
    pub terminal_value: f64,
    pub equity_value: f64,
    pub intrinsic_value_per_share: f64,
    pub current_price: f64,
    /// Fraction, 0.25 = 25% upside
    pub upside_pct: f64,
    pub normalized_flag: bool,
    pub notes: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// Why an investigation task was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRationale {
    ExtremeUpside,
    ExtremeDownside,
    IncomeDivergence,
}

impl TaskRationale {
    pub fn label(&self) -> &'static str {
        match self {
            TaskRationale::ExtremeUpside => "extreme_upside",
            TaskRationale::ExtremeDownside => "extreme_downside",
            TaskRationale::IncomeDivergence => "income_divergence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationTask {
    pub directive: String,
    pub rationale: TaskRationale,
}

impl InvestigationTask {
    pub fn new(directive: impl Into<String>, rationale: TaskRationale) -> Self {
        Self {
            directive: directive.into(),
            rationale,
        }
    }
}

/// Ordered investigation tasks for one run. Insertion order is detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueue {
    tasks: Vec<InvestigationTask>,
    sealed: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: InvestigationTask) -> Result<(), ValuationError> {
        if self.sealed {
            return Err(ValuationError::QueueSealed);
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn extend<I>(&mut self, tasks: I) -> Result<(), ValuationError>
    where
        I: IntoIterator<Item = InvestigationTask>,
    {
        for task in tasks {
            self.push(task)?;
        }
        Ok(())
    }

    /// Seal the queue and hand the tasks to research. Tasks stay readable afterwards.
    pub fn drain(&mut self) -> &[InvestigationTask] {
        self.sealed = true;
        &self.tasks
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn as_slice(&self) -> &[InvestigationTask] {
        &self.tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvestigationTask> {
        self.tasks.iter()
    }
}

/// Company classification from the profiling collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

/// A known gap in the numbers, surfaced in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLimitation {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub field: Option<String>,
}

impl DataLimitation {
    pub fn from_error(err: &ValuationError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            field: err.field().map(str::to_string),
        }
    }
}

/// Qualitative research returned by the research collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchNotes {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    pub targeted: bool,
}

/// Everything the report-assembly collaborator needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    pub ticker: String,
    pub strategy: StrategyId,
    pub result: Option<ValuationResult>,
    pub tasks: Vec<InvestigationTask>,
    pub research: Option<ResearchNotes>,
    pub limitations: Vec<DataLimitation>,
    /// Set whenever the task queue was non-empty
    pub requires_discrepancy_section: bool,
    /// No numeric valuation could be produced
    pub qualitative_only: bool,
    /// Reviewer instructions carried into a rewrite, oldest first
    #[serde(default)]
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub markdown: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw_in_millions() -> RawFinancials {
        RawFinancials {
            fiscal_year: "2024".to_string(),
            unit: Some(Magnitude::Millions),
            total_revenue: dec!(383285),
            net_income: dec!(96995),
            normalized_income: Some(dec!(97120.5)),
            operating_cash_flow: dec!(110543),
            capital_expenditures: dec!(-10959),
            depreciation_amortization: None,
            gain_on_sale: None,
            dividends_paid: Some(dec!(15025)),
            shareholders_equity: None,
            source: "SEC 10-K".to_string(),
        }
    }

    #[test]
    fn test_magnitude_parses_annotations() {
        assert_eq!("USD millions".parse::<Magnitude>().unwrap(), Magnitude::Millions);
        assert_eq!("in thousands".parse::<Magnitude>().unwrap(), Magnitude::Thousands);
        assert_eq!("bn".parse::<Magnitude>().unwrap(), Magnitude::Billions);
        assert_eq!("K".parse::<Magnitude>().unwrap(), Magnitude::Thousands);
        assert_eq!("units".parse::<Magnitude>().unwrap(), Magnitude::Units);
    }

    #[test]
    fn test_magnitude_rejects_missing_annotation() {
        let err = "USD".parse::<Magnitude>().unwrap_err();
        assert_eq!(err, ValuationError::UnitAmbiguity { field: "unit".to_string() });
        assert!("".parse::<Magnitude>().is_err());
    }

    #[test]
    fn test_unit_annotation_deserializes_from_free_text() {
        let parse = |unit: &str| {
            let json = format!(
                r#"{{"fiscal_year": "2024", "unit": "{}", "total_revenue": 10, "net_income": 1,
                    "operating_cash_flow": 2, "capital_expenditures": -1}}"#,
                unit
            );
            serde_json::from_str::<RawFinancials>(&json).unwrap().unit
        };
        assert_eq!(parse("USD millions"), Some(Magnitude::Millions));
        assert_eq!(parse("M"), Some(Magnitude::Millions));
        assert_eq!(parse("in thousands"), Some(Magnitude::Thousands));
        assert_eq!(parse("millions"), Some(Magnitude::Millions));
        assert_eq!(parse("USD"), None);

        let json = serde_json::to_string(&Magnitude::Billions).unwrap();
        assert_eq!(serde_json::from_str::<Magnitude>(&json).unwrap(), Magnitude::Billions);
        assert!(serde_json::from_str::<Magnitude>(r#""USD""#).is_err());
    }

    #[test]
    fn test_expressed_in_overflow_is_an_error() {
        let mut raw = raw_in_millions();
        raw.unit = Some(Magnitude::Billions);
        raw.total_revenue = Decimal::MAX;
        assert_eq!(
            raw.expressed_in(Magnitude::Units),
            Err(ValuationError::InvalidInput {
                field: "total_revenue".to_string(),
                reason: "exceeds representable range".to_string(),
            })
        );
    }

    #[test]
    fn test_expressed_in_is_exact() {
        let raw = raw_in_millions();
        let thousands = raw.expressed_in(Magnitude::Thousands).unwrap();
        assert_eq!(thousands.total_revenue, dec!(383285000));
        assert_eq!(thousands.normalized_income, Some(dec!(97120500)));

        let back = thousands.expressed_in(Magnitude::Millions).unwrap();
        assert_eq!(back.total_revenue, raw.total_revenue);
        assert_eq!(back.normalized_income, raw.normalized_income);
    }

    #[test]
    fn test_expressed_in_requires_unit() {
        let mut raw = raw_in_millions();
        raw.unit = None;
        assert!(matches!(
            raw.expressed_in(Magnitude::Units),
            Err(ValuationError::UnitAmbiguity { .. })
        ));
    }

    #[test]
    fn test_strategy_id_parsing() {
        assert_eq!("GENERAL_DCF".parse::<StrategyId>().unwrap(), StrategyId::GeneralDcf);
        assert_eq!("reit_nav".parse::<StrategyId>().unwrap(), StrategyId::ReitNav);
        assert_eq!("saas_rule40".parse::<StrategyId>().unwrap(), StrategyId::SaasRuleOf40);
        assert_eq!("bank-ddm".parse::<StrategyId>().unwrap(), StrategyId::BankDdm);

        let err = "UTILITY_RAB".parse::<StrategyId>().unwrap_err();
        assert_eq!(err, ValuationError::UnknownStrategy("UTILITY_RAB".to_string()));
    }

    #[test]
    fn test_strategy_id_round_trips_through_display() {
        for id in StrategyId::ALL {
            assert_eq!(id.to_string().parse::<StrategyId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn test_task_queue_keeps_order_and_seals() {
        let mut queue = TaskQueue::new();
        assert!(queue.is_empty());
        queue
            .push(InvestigationTask::new("first", TaskRationale::ExtremeUpside))
            .unwrap();
        queue
            .push(InvestigationTask::new("second", TaskRationale::IncomeDivergence))
            .unwrap();

        let drained: Vec<String> = queue.drain().iter().map(|t| t.directive.clone()).collect();
        assert_eq!(drained, vec!["first", "second"]);
        assert!(queue.is_sealed());

        let err = queue
            .push(InvestigationTask::new("late", TaskRationale::ExtremeDownside))
            .unwrap_err();
        assert_eq!(err, ValuationError::QueueSealed);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_data_source_parsing() {
        assert_eq!("Filing".parse::<DataSource>().unwrap(), DataSource::Filing);
        assert_eq!(" user ".parse::<DataSource>().unwrap(), DataSource::User);
        assert!("average".parse::<DataSource>().is_err());
    }

    #[test]
    fn test_data_conflict_describes_variance() {
        let conflict = DataConflict {
            field: "total_revenue".into(),
            filing: dec!(100000000),
            user: dec!(110000000),
            variance: 0.1,
        };
        assert_eq!(
            conflict.describe(),
            "total_revenue mismatch: filing says 100000000, user says 110000000 (diff 10.0%)"
        );
    }

    #[test]
    fn test_record_has_field() {
        let record = FinancialRecord {
            fiscal_year: "2024".into(),
            total_revenue: dec!(100),
            net_income: dec!(10),
            normalized_income: None,
            operating_cash_flow: dec!(20),
            capital_expenditures: dec!(5),
            depreciation_amortization: None,
            gain_on_sale: None,
            dividends_paid: Some(dec!(3)),
            shareholders_equity: None,
            free_cash_flow: FreeCashFlow { value: 15.0, source: FcfSource::FiscalYear },
            lagged: true,
            normalized_flag: false,
            income_delta_pct: None,
            source: "test".into(),
        };
        assert!(record.has_field("dividends_paid"));
        assert!(!record.has_field("depreciation_amortization"));
        assert_eq!(record.fiscal_year_fcf(), dec!(15));
        assert_eq!(record.earnings(), dec!(10));
    }
}
