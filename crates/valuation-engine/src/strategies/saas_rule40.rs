use valuation_core::math::{project, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, GrowthSource, MarketSnapshot, StrategyId, ValuationBasis,
    ValuationError, ValuationResult,
};

use super::{
    discount_rate, net_debt_bridge, price_multiples, require_shares, GrowthEstimate, Valuation,
};

/// (Rule of 40 score above, EV/Sales multiple), highest first.
const SALES_MULTIPLE_TIERS: [(f64, f64); 3] = [(50.0, 15.0), (40.0, 10.0), (30.0, 8.0)];
const FLOOR_SALES_MULTIPLE: f64 = 5.0;

pub fn rule_of_40(revenue_growth: f64, fcf_margin: f64) -> f64 {
    revenue_growth * 100.0 + fcf_margin * 100.0
}

pub fn sales_multiple(score: f64) -> f64 {
    SALES_MULTIPLE_TIERS
        .iter()
        .find(|(above, _)| score > *above)
        .map(|(_, multiple)| *multiple)
        .unwrap_or(FLOOR_SALES_MULTIPLE)
}

/// Growth software: revenue growth % + FCF margin % picks an EV/Sales multiple.
pub fn value(
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
) -> Result<ValuationResult, ValuationError> {
    let revenue = to_f64(record.total_revenue);
    if revenue <= 0.0 {
        return Err(ValuationError::NonPositiveBase {
            metric: "total_revenue".to_string(),
            value: revenue,
        });
    }
    let shares = require_shares(market)?;

    let mut notes = Vec::new();
    let multiples = price_multiples(record, market, config, &mut notes);
    let rates = discount_rate(market, config, &mut notes);

    let growth = match market.revenue_growth {
        Some(rate) => GrowthEstimate {
            rate,
            source: GrowthSource::RevenueGrowth,
            calibrated: false,
        },
        None => {
            notes.push("Revenue growth unavailable; Rule of 40 scored on 0% growth".to_string());
            GrowthEstimate {
                rate: 0.0,
                source: GrowthSource::Default,
                calibrated: false,
            }
        }
    };

    let fcf_margin = record.free_cash_flow.value / revenue;
    let score = rule_of_40(growth.rate, fcf_margin);
    let multiple = sales_multiple(score);
    notes.push(format!(
        "Rule of 40 score {:.1} ({:.1}% growth + {:.1}% FCF margin) -> {:.0}x EV/Sales",
        score,
        growth.rate * 100.0,
        fcf_margin * 100.0,
        multiple
    ));
    if score < 40.0 {
        notes.push("Fails the Rule of 40".to_string());
    }

    let enterprise_value = revenue * multiple;
    let equity_value = net_debt_bridge(enterprise_value, market, &mut notes);

    Ok(Valuation {
        strategy: StrategyId::SaasRuleOf40,
        basis: ValuationBasis::Revenue,
        record,
        market,
        multiples,
        rates,
        growth,
        projected: project(revenue, growth.rate, config.projection_years),
        terminal_value: enterprise_value,
        equity_value,
        shares,
        notes,
    }
    .finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::fixtures;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_multiple_tiers() {
        assert_eq!(sales_multiple(55.0), 15.0);
        assert_eq!(sales_multiple(45.0), 10.0);
        assert_eq!(sales_multiple(35.0), 8.0);
        assert_eq!(sales_multiple(30.0), 5.0);
        assert_eq!(sales_multiple(-20.0), 5.0);
    }

    #[test]
    fn test_high_growth_company() {
        let mut market = fixtures::market();
        market.revenue_growth = Some(0.35);
        // FCF 100 on revenue 1000 = 10% margin; score 45
        let result = value(&fixtures::record(), &market, &EngineConfig::default()).unwrap();
        assert_relative_eq!(result.equity_value, 10_000.0, epsilon = 1e-6);
        assert_relative_eq!(result.intrinsic_value_per_share, 100.0, epsilon = 1e-9);
        assert_eq!(result.growth_source, GrowthSource::RevenueGrowth);
        assert_eq!(result.strategy, StrategyId::SaasRuleOf40);
    }

    #[test]
    fn test_missing_growth_scores_margin_only() {
        let result = value(&fixtures::record(), &fixtures::market(), &EngineConfig::default()).unwrap();
        assert_relative_eq!(result.equity_value, 5_000.0, epsilon = 1e-6);
        assert!(result.notes.iter().any(|n| n.contains("Fails the Rule of 40")));
    }

    #[test]
    fn test_zero_revenue_rejected() {
        let mut record = fixtures::record();
        record.total_revenue = dec!(0);
        let err = value(&record, &fixtures::market(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.field(), Some("total_revenue"));
    }
}
