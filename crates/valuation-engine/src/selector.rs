use tracing::{debug, info};
use valuation_core::{CompanyProfile, FinancialRecord, StrategyId, ValuationError};

/// Industry keywords, checked before the sector table. First match wins.
const INDUSTRY_KEYWORDS: &[(&str, StrategyId)] = &[
    ("reit", StrategyId::ReitNav),
    ("real estate", StrategyId::ReitNav),
    ("bank", StrategyId::BankDdm),
    ("insurance", StrategyId::BankDdm),
    ("capital markets", StrategyId::BankDdm),
    ("software", StrategyId::SaasRuleOf40),
    ("saas", StrategyId::SaasRuleOf40),
];

const SECTOR_KEYWORDS: &[(&str, StrategyId)] = &[
    ("real estate", StrategyId::ReitNav),
    ("financial", StrategyId::BankDdm),
];

/// Choose the valuation strategy for a company.
///
/// An explicit override always wins and must name a registered strategy.
/// Otherwise the industry is matched first, then the sector; anything
/// unrecognized (including an empty profile) gets GENERAL_DCF.
pub fn select_strategy(
    sector: Option<&str>,
    industry: Option<&str>,
    override_id: Option<&str>,
) -> Result<StrategyId, ValuationError> {
    if let Some(id) = override_id {
        let strategy = id.parse::<StrategyId>()?;
        info!("Strategy override: {}", strategy);
        return Ok(strategy);
    }

    let matched = industry
        .and_then(|value| match_keywords(value, INDUSTRY_KEYWORDS))
        .or_else(|| sector.and_then(|value| match_keywords(value, SECTOR_KEYWORDS)));

    let strategy = matched.unwrap_or(StrategyId::GeneralDcf);
    debug!(
        "Selected {} for sector={:?} industry={:?}",
        strategy, sector, industry
    );
    Ok(strategy)
}

pub fn select_for_profile(
    profile: &CompanyProfile,
    override_id: Option<&str>,
) -> Result<StrategyId, ValuationError> {
    select_strategy(
        profile.sector.as_deref(),
        profile.industry.as_deref(),
        override_id,
    )
}

fn match_keywords(value: &str, table: &[(&str, StrategyId)]) -> Option<StrategyId> {
    let lowered = value.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, strategy)| *strategy)
}

/// Required record fields the strategy would be missing.
pub fn missing_requirements(strategy: StrategyId, record: &FinancialRecord) -> Vec<&'static str> {
    strategy
        .required_fields()
        .iter()
        .copied()
        .filter(|field| !record.has_field(field))
        .collect()
}

pub fn check_requirements(
    strategy: StrategyId,
    record: &FinancialRecord,
) -> Result<(), ValuationError> {
    match missing_requirements(strategy, record).first() {
        Some(field) => Err(ValuationError::MissingFinancialField {
            strategy: strategy.as_str().to_string(),
            field: field.to_string(),
        }),
        None => Ok(()),
    }
}
