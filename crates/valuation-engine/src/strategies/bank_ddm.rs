use valuation_core::math::{discount_factor, perpetuity_value, present_value, project, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, GrowthSource, MarketSnapshot, StrategyId, ValuationBasis,
    ValuationError, ValuationResult,
};

use super::{
    bound_growth, discount_rate, infer_growth, price_multiples, require_convergent, require_shares,
    GrowthEstimate, Valuation,
};

/// Dividend discount model for banks and insurers.
///
/// Dividends are already equity cash flows, so there is no net-debt bridge.
/// Growth is the sustainable rate ROE x retention when equity is known.
pub fn value(
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
) -> Result<ValuationResult, ValuationError> {
    let dividends = record
        .dividends_paid
        .ok_or_else(|| ValuationError::MissingFinancialField {
            strategy: StrategyId::BankDdm.as_str().to_string(),
            field: "dividends_paid".to_string(),
        })?;
    // Filings report dividends as a financing outflow.
    let base = to_f64(dividends.abs());
    if base <= 0.0 {
        return Err(ValuationError::NonPositiveBase {
            metric: "dividends_paid".to_string(),
            value: base,
        });
    }

    let mut notes = Vec::new();
    let multiples = price_multiples(record, market, config, &mut notes);
    let shares = require_shares(market)?;
    let rates = discount_rate(market, config, &mut notes);
    require_convergent(rates.rate, config.terminal_growth)?;

    let growth = sustainable_growth(record, base, config)
        .unwrap_or_else(|| {
            notes.push("Equity or earnings unavailable; dividend growth inferred from P/E".to_string());
            infer_growth(multiples.growth_pe(), market, config)
        });
    let growth = bound_growth(growth, config, &mut notes);

    let projected = project(base, growth.rate, config.projection_years);
    let final_flow = projected.last().copied().unwrap_or(base);
    let terminal_value = perpetuity_value(final_flow, rates.rate, config.terminal_growth).ok_or(
        ValuationError::InvalidDiscountRate {
            discount_rate: rates.rate,
            terminal_growth: config.terminal_growth,
        },
    )?;
    let equity_value = present_value(&projected, rates.rate)
        + terminal_value * discount_factor(rates.rate, config.projection_years);

    notes.push(format!(
        "Dividend base {:.0} from FY {}; cost of equity {:.2}%",
        base,
        record.fiscal_year,
        rates.rate * 100.0
    ));

    Ok(Valuation {
        strategy: StrategyId::BankDdm,
        basis: ValuationBasis::Dividends,
        record,
        market,
        multiples,
        rates,
        growth,
        projected,
        terminal_value,
        equity_value,
        shares,
        notes,
    }
    .finish())
}

/// ROE x (1 - payout), clamped to [0, max_dividend_growth].
fn sustainable_growth(
    record: &FinancialRecord,
    dividends: f64,
    config: &EngineConfig,
) -> Option<GrowthEstimate> {
    let equity = record.shareholders_equity.map(to_f64).filter(|e| *e > 0.0)?;
    let net_income = Some(to_f64(record.net_income)).filter(|n| *n > 0.0)?;

    let roe = net_income / equity;
    let retention = (1.0 - dividends / net_income).clamp(0.0, 1.0);
    Some(GrowthEstimate {
        rate: (roe * retention).clamp(0.0, config.max_dividend_growth),
        source: GrowthSource::SustainableGrowth { roe, retention },
        calibrated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::fixtures;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn bank_record() -> FinancialRecord {
        let mut record = fixtures::record();
        record.dividends_paid = Some(dec!(-40));
        record.shareholders_equity = Some(dec!(1000));
        record
    }

    #[test]
    fn test_sustainable_growth() {
        let result = value(&bank_record(), &fixtures::market(), &EngineConfig::default()).unwrap();
        // ROE 10%, payout 40% -> 6%
        assert_relative_eq!(result.implied_growth_rate, 0.06, epsilon = 1e-12);
        assert!(matches!(result.growth_source, GrowthSource::SustainableGrowth { .. }));
        assert_relative_eq!(result.projected_cash_flows[0], 42.4, epsilon = 1e-9);
        assert!(result.intrinsic_value_per_share > 0.0);
        assert_eq!(result.strategy, StrategyId::BankDdm);
    }

    #[test]
    fn test_growth_capped() {
        let mut record = bank_record();
        record.shareholders_equity = Some(dec!(200));
        let result = value(&record, &fixtures::market(), &EngineConfig::default()).unwrap();
        assert_relative_eq!(result.implied_growth_rate, 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_falls_back_to_market_growth_without_equity() {
        let mut record = bank_record();
        record.shareholders_equity = None;
        let result = value(&record, &fixtures::market(), &EngineConfig::default()).unwrap();
        assert!(matches!(result.growth_source, GrowthSource::PegImplied { .. }));
    }

    #[test]
    fn test_requires_dividends() {
        let err = value(&fixtures::record(), &fixtures::market(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.code(), "missing_financial_field");
        assert_eq!(err.field(), Some("dividends_paid"));
    }

    #[test]
    fn test_zero_dividends_rejected() {
        let mut record = bank_record();
        record.dividends_paid = Some(dec!(0));
        let err = value(&record, &fixtures::market(), &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ValuationError::NonPositiveBase { .. }));
    }
}
