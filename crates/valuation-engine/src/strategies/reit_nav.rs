use rust_decimal::Decimal;
use valuation_core::math::{project, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, GrowthSource, MarketSnapshot, PeTrend, StrategyId,
    ValuationBasis, ValuationError, ValuationResult,
};

use super::{bound_growth, discount_rate, require_shares, GrowthEstimate, Multiples, Valuation};

/// P/FFO below this is flagged as cheap, above `EXPENSIVE_P_FFO` as rich.
const CHEAP_P_FFO: f64 = 12.0;
const EXPENSIVE_P_FFO: f64 = 22.0;

/// REIT valuation on funds from operations.
///
/// FFO = net income + D&A - gains on property sales. Fair equity value is FFO
/// times the target P/FFO multiple. The projection is informational.
pub fn value(
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
) -> Result<ValuationResult, ValuationError> {
    let depreciation = record
        .depreciation_amortization
        .ok_or_else(|| ValuationError::MissingFinancialField {
            strategy: StrategyId::ReitNav.as_str().to_string(),
            field: "depreciation_amortization".to_string(),
        })?;
    let ffo = to_f64(record.net_income + depreciation - record.gain_on_sale.unwrap_or(Decimal::ZERO));
    if ffo <= 0.0 {
        return Err(ValuationError::NonPositiveBase {
            metric: "ffo".to_string(),
            value: ffo,
        });
    }
    let shares = require_shares(market)?;

    let mut notes = Vec::new();
    let p_ffo = market.market_cap / ffo;
    let verdict = if p_ffo < CHEAP_P_FFO {
        "cheap"
    } else if p_ffo > EXPENSIVE_P_FFO {
        "expensive"
    } else {
        "fair"
    };
    notes.push(format!(
        "FFO {:.0}; P/FFO {:.1}x looks {} against a {:.1}x target",
        ffo, p_ffo, verdict, config.reit_target_multiple
    ));
    if record.gain_on_sale.is_none() {
        notes.push("No gains on sale reported; FFO not reduced".to_string());
    }

    let revenue = to_f64(record.total_revenue);
    let multiples = Multiples {
        pe_fy: Some(p_ffo),
        pe_ttm: None,
        trend: PeTrend::Stable,
        net_profit_margin: (revenue > 0.0).then(|| to_f64(record.net_income) / revenue),
    };

    let rates = discount_rate(market, config, &mut notes);
    let growth = match market.revenue_growth {
        Some(rate) => GrowthEstimate {
            rate,
            source: GrowthSource::RevenueGrowth,
            calibrated: false,
        },
        None => GrowthEstimate {
            rate: config.default_growth,
            source: GrowthSource::Default,
            calibrated: false,
        },
    };
    let growth = bound_growth(growth, config, &mut notes);

    let terminal_value = ffo * config.reit_target_multiple;

    Ok(Valuation {
        strategy: StrategyId::ReitNav,
        basis: ValuationBasis::FundsFromOperations,
        record,
        market,
        multiples,
        rates,
        growth,
        projected: project(ffo, growth.rate, config.projection_years),
        terminal_value,
        equity_value: terminal_value,
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

    fn reit_record() -> FinancialRecord {
        let mut record = fixtures::record();
        record.depreciation_amortization = Some(dec!(60));
        record.gain_on_sale = Some(dec!(10));
        record
    }

    #[test]
    fn test_ffo_multiple() {
        let result = value(&reit_record(), &fixtures::market(), &EngineConfig::default()).unwrap();
        // FFO = 100 + 60 - 10 = 150; 150 * 16 / 100 shares
        assert_relative_eq!(result.equity_value, 2400.0, epsilon = 1e-9);
        assert_relative_eq!(result.intrinsic_value_per_share, 24.0, epsilon = 1e-9);
        assert_relative_eq!(result.pe_ratio_fy.unwrap(), 1000.0 / 150.0, epsilon = 1e-9);
        assert!(result.notes.iter().any(|n| n.contains("cheap")));
        assert_eq!(result.strategy, StrategyId::ReitNav);
    }

    #[test]
    fn test_requires_depreciation() {
        let err = value(&fixtures::record(), &fixtures::market(), &EngineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ValuationError::MissingFinancialField {
                strategy: "REIT_NAV".to_string(),
                field: "depreciation_amortization".to_string(),
            }
        );
    }

    #[test]
    fn test_negative_ffo_rejected() {
        let mut record = reit_record();
        record.net_income = dec!(-200);
        let err = value(&record, &fixtures::market(), &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ValuationError::NonPositiveBase { ref metric, .. } if metric == "ffo"));
    }
}
