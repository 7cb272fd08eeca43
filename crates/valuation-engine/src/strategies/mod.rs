//! Valuation models and the building blocks they share.
//!
//! Every model is a pure function of the normalized record, the market snapshot
//! and the engine configuration. Models never mutate their inputs and build a
//! fresh `ValuationResult` on success.

pub mod bank_ddm;
pub mod general_dcf;
pub mod reit_nav;
pub mod saas_rule40;

use chrono::Utc;
use valuation_core::math::{ceil_to_whole_percent, relative_delta, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, GrowthSource, MarketSnapshot, PeTrend, StrategyId,
    ValuationBasis, ValuationError, ValuationResult,
};

pub type ValuationModel =
    fn(&FinancialRecord, &MarketSnapshot, &EngineConfig) -> Result<ValuationResult, ValuationError>;

/// Registry lookup. Closed set, so every id has a model.
pub fn model_for(strategy: StrategyId) -> ValuationModel {
    match strategy {
        StrategyId::GeneralDcf => general_dcf::value,
        StrategyId::BankDdm => bank_ddm::value,
        StrategyId::ReitNav => reit_nav::value,
        StrategyId::SaasRuleOf40 => saas_rule40::value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multiples {
    pub pe_fy: Option<f64>,
    pub pe_ttm: Option<f64>,
    pub trend: PeTrend,
    pub net_profit_margin: Option<f64>,
}

impl Multiples {
    /// Multiple used for growth inference: trailing first, fiscal year otherwise
    pub fn growth_pe(&self) -> Option<f64> {
        self.pe_ttm.or(self.pe_fy)
    }
}

/// FY and TTM P/E, their trend and net margin.
pub fn price_multiples(
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
    notes: &mut Vec<String>,
) -> Multiples {
    let earnings = to_f64(record.earnings());
    let pe_fy = (earnings > 0.0).then(|| market.market_cap / earnings);
    let pe_ttm = market.trailing_pe.filter(|pe| *pe > 0.0);

    if pe_fy.is_none() {
        notes.push(format!(
            "FY {} earnings are not positive; fiscal-year P/E undefined",
            record.fiscal_year
        ));
    }

    let trend = classify_pe_trend(pe_fy, pe_ttm, config.pe_trend_threshold);
    if pe_fy.is_none() || pe_ttm.is_none() {
        notes.push("P/E trend not comparable; reported as STABLE".to_string());
    }

    let revenue = to_f64(record.total_revenue);
    let net_profit_margin = (revenue > 0.0).then(|| to_f64(record.net_income) / revenue);

    Multiples {
        pe_fy,
        pe_ttm,
        trend,
        net_profit_margin,
    }
}

/// A falling multiple (cheaper on trailing earnings) is improving.
pub fn classify_pe_trend(pe_fy: Option<f64>, pe_ttm: Option<f64>, threshold: f64) -> PeTrend {
    let (Some(fy), Some(ttm)) = (pe_fy, pe_ttm) else {
        return PeTrend::Stable;
    };
    match relative_delta(ttm, fy) {
        Some(change) if change < -threshold => PeTrend::Improving,
        Some(change) if change > threshold => PeTrend::Declining,
        _ => PeTrend::Stable,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthEstimate {
    pub rate: f64,
    pub source: GrowthSource,
    pub calibrated: bool,
}

/// Growth implied by the market multiple.
///
/// PEG first: growth = P/E / PEG / 100, accepted only strictly inside (0, 1).
/// Otherwise the P/E tier table, and the default rate when no usable P/E exists.
pub fn infer_growth(pe: Option<f64>, market: &MarketSnapshot, config: &EngineConfig) -> GrowthEstimate {
    let estimate = |rate, source| GrowthEstimate {
        rate,
        source,
        calibrated: false,
    };

    let Some(pe) = pe.filter(|pe| *pe > 0.0) else {
        return estimate(config.default_growth, GrowthSource::Default);
    };

    if let Some(peg) = market.peg_ratio.filter(|peg| *peg > 0.0) {
        let implied = pe / peg / 100.0;
        if implied > 0.0 && implied < 1.0 {
            return estimate(implied, GrowthSource::PegImplied { pe, peg });
        }
    }

    let rate = config
        .pe_growth_tiers
        .iter()
        .find(|(above, _)| pe > *above)
        .map(|(_, growth)| *growth)
        .unwrap_or(config.default_growth);
    estimate(rate, GrowthSource::PeTier { pe })
}

/// Haircut growth when trailing FCF already runs ahead of the fiscal year, so
/// the projection does not count the same improvement twice.
pub fn calibrate_growth(
    estimate: GrowthEstimate,
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
    notes: &mut Vec<String>,
) -> GrowthEstimate {
    let fiscal = to_f64(record.fiscal_year_fcf());
    match market.trailing_free_cash_flow {
        Some(trailing) if trailing > fiscal => {
            let rate = estimate.rate * (1.0 - config.calibration_haircut);
            notes.push(format!(
                "Trailing FCF {:.0} exceeds FY FCF {:.0}; growth reduced from {:.2}% to {:.2}%",
                trailing,
                fiscal,
                estimate.rate * 100.0,
                rate * 100.0
            ));
            GrowthEstimate {
                rate,
                calibrated: true,
                ..estimate
            }
        }
        _ => estimate,
    }
}

/// Apply the optional configured floor and cap.
pub fn bound_growth(
    estimate: GrowthEstimate,
    config: &EngineConfig,
    notes: &mut Vec<String>,
) -> GrowthEstimate {
    let mut rate = estimate.rate;
    if let Some(cap) = config.growth_cap {
        rate = rate.min(cap);
    }
    if let Some(floor) = config.growth_floor {
        rate = rate.max(floor);
    }
    if rate != estimate.rate {
        notes.push(format!(
            "Growth bounded from {:.2}% to {:.2}%",
            estimate.rate * 100.0,
            rate * 100.0
        ));
    }
    GrowthEstimate { rate, ..estimate }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscountRate {
    pub capm: f64,
    pub hurdle: f64,
    pub rate: f64,
}

/// max(CAPM, hurdle). CAPM = rf + beta * ERP; hurdle = rf rounded up to a whole
/// percent plus the configured spread.
pub fn discount_rate(
    market: &MarketSnapshot,
    config: &EngineConfig,
    notes: &mut Vec<String>,
) -> DiscountRate {
    let rf = market.risk_free_rate.unwrap_or_else(|| {
        notes.push(format!(
            "Risk-free rate unavailable; using {:.2}%",
            config.default_risk_free_rate * 100.0
        ));
        config.default_risk_free_rate
    });
    let beta = market.beta.unwrap_or_else(|| {
        notes.push(format!("Beta unavailable; using {:.2}", config.default_beta));
        config.default_beta
    });

    let capm = rf + beta * config.equity_risk_premium;
    let hurdle = ceil_to_whole_percent(rf) + config.hurdle_spread;
    DiscountRate {
        capm,
        hurdle,
        rate: capm.max(hurdle),
    }
}

pub fn require_shares(market: &MarketSnapshot) -> Result<f64, ValuationError> {
    market
        .shares_outstanding
        .filter(|shares| *shares > 0.0)
        .ok_or_else(|| ValuationError::MissingMarketData {
            field: "shares_outstanding".to_string(),
        })
}

pub fn require_convergent(rate: f64, terminal_growth: f64) -> Result<(), ValuationError> {
    if rate <= terminal_growth {
        return Err(ValuationError::InvalidDiscountRate {
            discount_rate: rate,
            terminal_growth,
        });
    }
    Ok(())
}

/// Enterprise value to equity value: subtract debt, add cash, when known.
pub fn net_debt_bridge(enterprise_value: f64, market: &MarketSnapshot, notes: &mut Vec<String>) -> f64 {
    match (market.total_debt, market.cash_and_equivalents) {
        (None, None) => {
            notes.push("Debt and cash unavailable; equity value equals enterprise value".to_string());
            enterprise_value
        }
        (debt, cash) => enterprise_value - debt.unwrap_or(0.0) + cash.unwrap_or(0.0),
    }
}

/// Everything a model computed, folded into a `ValuationResult`.
pub(crate) struct Valuation<'a> {
    pub strategy: StrategyId,
    pub basis: ValuationBasis,
    pub record: &'a FinancialRecord,
    pub market: &'a MarketSnapshot,
    pub multiples: Multiples,
    pub rates: DiscountRate,
    pub growth: GrowthEstimate,
    pub projected: Vec<f64>,
    pub terminal_value: f64,
    pub equity_value: f64,
    pub shares: f64,
    pub notes: Vec<String>,
}

impl Valuation<'_> {
    pub fn finish(self) -> ValuationResult {
        let intrinsic_value_per_share = self.equity_value / self.shares;
        let current_price = self.market.current_price;
        ValuationResult {
            strategy: self.strategy,
            pe_ratio_fy: self.multiples.pe_fy,
            pe_ratio_ttm: self.multiples.pe_ttm,
            pe_trend: self.multiples.trend,
            net_profit_margin: self.multiples.net_profit_margin,
            discount_rate: self.rates.rate,
            capm_rate: self.rates.capm,
            hurdle_rate: self.rates.hurdle,
            implied_growth_rate: self.growth.rate,
            growth_source: self.growth.source,
            growth_calibrated: self.growth.calibrated,
            fcf_source: self.record.free_cash_flow.source,
            basis: self.basis,
            lagged: self.record.lagged,
            projected_cash_flows: self.projected,
            terminal_value: self.terminal_value,
            equity_value: self.equity_value,
            intrinsic_value_per_share,
            current_price,
            upside_pct: (intrinsic_value_per_share - current_price) / current_price,
            normalized_flag: self.record.normalized_flag,
            notes: self.notes,
            computed_at: Utc::now(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pe_trend_classification() {
        assert_eq!(classify_pe_trend(Some(20.0), Some(16.0), 0.10), PeTrend::Improving);
        assert_eq!(classify_pe_trend(Some(20.0), Some(25.0), 0.10), PeTrend::Declining);
        assert_eq!(classify_pe_trend(Some(20.0), Some(21.0), 0.10), PeTrend::Stable);
        assert_eq!(classify_pe_trend(None, Some(21.0), 0.10), PeTrend::Stable);
    }

    #[test]
    fn test_peg_implied_growth() {
        let market = fixtures::market();
        let growth = infer_growth(Some(10.0), &market, &EngineConfig::default());
        assert_relative_eq!(growth.rate, 0.05, epsilon = 1e-12);
        assert_eq!(growth.source, GrowthSource::PegImplied { pe: 10.0, peg: 2.0 });
    }

    #[test]
    fn test_implausible_peg_falls_back_to_tiers() {
        let config = EngineConfig::default();
        let mut market = fixtures::market();
        // 120 / 0.5 / 100 = 2.4, outside (0, 1)
        market.peg_ratio = Some(0.5);
        let growth = infer_growth(Some(120.0), &market, &config);
        assert_relative_eq!(growth.rate, 0.25, epsilon = 1e-12);
        assert_eq!(growth.source, GrowthSource::PeTier { pe: 120.0 });

        market.peg_ratio = None;
        assert_relative_eq!(infer_growth(Some(30.0), &market, &config).rate, 0.15, epsilon = 1e-12);
        assert_relative_eq!(infer_growth(Some(12.0), &market, &config).rate, 0.10, epsilon = 1e-12);
        let none = infer_growth(None, &market, &config);
        assert_eq!(none.source, GrowthSource::Default);
    }

    #[test]
    fn test_calibration_haircut() {
        let config = EngineConfig::default();
        let record = fixtures::record();
        let mut market = fixtures::market();
        let base = infer_growth(Some(10.0), &market, &config);
        let mut notes = Vec::new();

        let untouched = calibrate_growth(base, &record, &market, &config, &mut notes);
        assert!(!untouched.calibrated);
        assert!(notes.is_empty());

        market.trailing_free_cash_flow = Some(120.0);
        let first = calibrate_growth(base, &record, &market, &config, &mut notes);
        let second = calibrate_growth(base, &record, &market, &config, &mut notes);
        assert!(first.calibrated);
        assert_relative_eq!(first.rate, 0.0375, epsilon = 1e-12);
        assert_eq!(first, second);
    }

    #[test]
    fn test_growth_bounds() {
        let config = EngineConfig::default().with_growth_bounds(0.05, 0.20);
        let mut notes = Vec::new();
        let low = GrowthEstimate { rate: 0.01, source: GrowthSource::Default, calibrated: false };
        assert_relative_eq!(bound_growth(low, &config, &mut notes).rate, 0.05);
        let high = GrowthEstimate { rate: 0.25, ..low };
        assert_relative_eq!(bound_growth(high, &config, &mut notes).rate, 0.20);
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn test_discount_rate_never_below_hurdle() {
        let config = EngineConfig::default();
        let mut notes = Vec::new();
        for rf_bp in (0..=1000).step_by(25) {
            for beta_tenths in -10..=30 {
                let mut market = fixtures::market();
                market.risk_free_rate = Some(rf_bp as f64 / 10_000.0);
                market.beta = Some(beta_tenths as f64 / 10.0);
                let rates = discount_rate(&market, &config, &mut notes);
                let floor = ceil_to_whole_percent(rf_bp as f64 / 10_000.0) + 0.055;
                assert!(rates.rate >= floor - 1e-12);
                assert!(rates.rate >= rates.capm);
            }
        }
    }

    #[test]
    fn test_discount_rate_defaults() {
        let config = EngineConfig::default();
        let mut notes = Vec::new();
        let market = MarketSnapshot::new(10.0, 1000.0);
        let rates = discount_rate(&market, &config, &mut notes);
        // CAPM 0.042 + 0.05 = 0.092; hurdle 0.05 + 0.055 = 0.105
        assert_relative_eq!(rates.capm, 0.092, epsilon = 1e-12);
        assert_relative_eq!(rates.hurdle, 0.105, epsilon = 1e-12);
        assert_relative_eq!(rates.rate, 0.105, epsilon = 1e-12);
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn test_net_debt_bridge() {
        let mut notes = Vec::new();
        let mut market = fixtures::market();
        assert_relative_eq!(net_debt_bridge(1000.0, &market, &mut notes), 1000.0);
        assert_eq!(notes.len(), 1);

        market.total_debt = Some(300.0);
        market.cash_and_equivalents = Some(50.0);
        assert_relative_eq!(net_debt_bridge(1000.0, &market, &mut notes), 750.0);
    }
}
