pub mod normalizer;
pub mod reconciler;
pub mod selector;
pub mod strategies;

pub use normalizer::normalize;
pub use reconciler::{reconcile, Reconciliation};
pub use selector::{check_requirements, missing_requirements, select_for_profile, select_strategy};
pub use strategies::{model_for, ValuationModel};

use tracing::{info, warn};
use valuation_core::{
    CompanyProfile, EngineConfig, FinancialRecord, MarketSnapshot, RawFinancials, StrategyId,
    ValuationError, ValuationResult,
};

/// Stateless front door to normalization, strategy selection and valuation.
pub struct ValuationEngine {
    config: EngineConfig,
}

impl ValuationEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ValuationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn normalize(
        &self,
        raw: &RawFinancials,
        market: &MarketSnapshot,
    ) -> Result<FinancialRecord, ValuationError> {
        normalize(raw, market)
    }

    pub fn select(
        &self,
        profile: &CompanyProfile,
        override_id: Option<&str>,
    ) -> Result<StrategyId, ValuationError> {
        select_for_profile(profile, override_id)
    }

    /// Run the selected model. Required record fields are checked first so a
    /// missing field is reported before any arithmetic happens.
    pub fn value(
        &self,
        strategy: StrategyId,
        record: &FinancialRecord,
        market: &MarketSnapshot,
    ) -> Result<ValuationResult, ValuationError> {
        check_requirements(strategy, record)?;
        let model = model_for(strategy);
        match model(record, market, &self.config) {
            Ok(result) => {
                info!(
                    "{} valuation: {:.2}/share vs {:.2} ({:+.1}%) at {:.2}% discount",
                    strategy,
                    result.intrinsic_value_per_share,
                    result.current_price,
                    result.upside_pct * 100.0,
                    result.discount_rate * 100.0
                );
                Ok(result)
            }
            Err(e) => {
                warn!("{} valuation failed: {}", strategy, e);
                Err(e)
            }
        }
    }
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;
    use valuation_core::Magnitude;

    fn raw() -> RawFinancials {
        RawFinancials {
            fiscal_year: "2024".to_string(),
            unit: Some(Magnitude::Millions),
            total_revenue: dec!(1000),
            net_income: dec!(100),
            normalized_income: None,
            operating_cash_flow: dec!(150),
            capital_expenditures: dec!(-50),
            depreciation_amortization: None,
            gain_on_sale: None,
            dividends_paid: None,
            shareholders_equity: None,
            source: "10-K".to_string(),
        }
    }

    fn market() -> MarketSnapshot {
        let mut market = MarketSnapshot::new(10.0, 1_000_000_000.0);
        market.shares_outstanding = Some(100_000_000.0);
        market.beta = Some(1.0);
        market.risk_free_rate = Some(0.04);
        market.peg_ratio = Some(2.0);
        market.trailing_pe = Some(10.0);
        market
    }

    #[test]
    fn test_end_to_end_general_dcf() {
        let engine = ValuationEngine::default();
        let record = engine.normalize(&raw(), &market()).unwrap();
        let profile = CompanyProfile {
            name: Some("Widgets Inc".into()),
            sector: Some("Industrials".into()),
            industry: Some("Specialty Industrial Machinery".into()),
        };
        let strategy = engine.select(&profile, None).unwrap();
        assert_eq!(strategy, StrategyId::GeneralDcf);

        let result = engine.value(strategy, &record, &market()).unwrap();
        assert_relative_eq!(result.discount_rate, 0.095, epsilon = 1e-12);
        assert_relative_eq!(result.intrinsic_value_per_share, 17.263, epsilon = 0.01);
        assert!(result.lagged);
    }

    #[test]
    fn test_same_inputs_same_result() {
        let engine = ValuationEngine::default();
        let record = engine.normalize(&raw(), &market()).unwrap();
        let a = engine.value(StrategyId::GeneralDcf, &record, &market()).unwrap();
        let b = engine.value(StrategyId::GeneralDcf, &record, &market()).unwrap();
        assert_eq!(a.intrinsic_value_per_share, b.intrinsic_value_per_share);
        assert_eq!(a.projected_cash_flows, b.projected_cash_flows);
        assert_eq!(a.notes, b.notes);
    }

    #[test]
    fn test_override_to_reit_without_depreciation() {
        let engine = ValuationEngine::default();
        let record = engine.normalize(&raw(), &market()).unwrap();
        let profile = CompanyProfile::default();

        let strategy = engine.select(&profile, Some("REIT_NAV")).unwrap();
        assert_eq!(strategy, StrategyId::ReitNav);
        let err = engine.value(strategy, &record, &market()).unwrap_err();
        assert!(matches!(err, ValuationError::MissingFinancialField { .. }));

        let err = engine.select(&profile, Some("UTILITY_RAB")).unwrap_err();
        assert!(matches!(err, ValuationError::UnknownStrategy(_)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            projection_years: 0,
            ..EngineConfig::default()
        };
        assert!(ValuationEngine::new(config).is_err());
    }

    #[test]
    fn test_every_strategy_has_a_model() {
        let engine = ValuationEngine::default();
        let mut record = engine.normalize(&raw(), &market()).unwrap();
        record.dividends_paid = Some(dec!(40000000));
        record.depreciation_amortization = Some(dec!(60000000));
        for strategy in StrategyId::ALL {
            let result = engine.value(strategy, &record, &market()).unwrap();
            assert_eq!(result.strategy, strategy);
            serde_json::to_string(&result).unwrap();
        }
    }
}
