use rust_decimal::Decimal;
use tracing::debug;
use valuation_core::math::{relative_delta, to_f64};
use valuation_core::{
    FcfSource, FinancialRecord, FreeCashFlow, MarketSnapshot, RawFinancials, ValuationError,
};

const OUT_OF_RANGE: &str = "exceeds representable range";

/// Scale raw filing figures to absolute units and pick the free-cash-flow base.
///
/// Trailing FCF from the snapshot wins. Without it the fiscal-year figure
/// (operating cash flow minus capex) is used and the record is marked lagged.
pub fn normalize(
    raw: &RawFinancials,
    market: &MarketSnapshot,
) -> Result<FinancialRecord, ValuationError> {
    let unit = raw.unit.ok_or_else(|| ValuationError::UnitAmbiguity {
        field: "unit".to_string(),
    })?;
    if raw.fiscal_year.trim().is_empty() {
        return Err(invalid("fiscal_year", "is empty"));
    }
    validate_market(market)?;

    let factor = unit.factor();
    // Canonical scale so equal amounts convert to identical f64 values.
    let scale = |field: &str, value: Decimal| {
        value
            .checked_mul(factor)
            .map(|scaled| scaled.normalize())
            .ok_or_else(|| invalid(field, OUT_OF_RANGE))
    };
    let scale_opt =
        |field: &str, value: Option<Decimal>| value.map(|v| scale(field, v)).transpose();

    let operating_cash_flow = scale("operating_cash_flow", raw.operating_cash_flow)?;
    let capital_expenditures = scale("capital_expenditures", raw.capital_expenditures)?.abs();
    let net_income = scale("net_income", raw.net_income)?;
    let normalized_income = scale_opt("normalized_income", raw.normalized_income)?;

    let (free_cash_flow, lagged) = match market.trailing_free_cash_flow {
        Some(trailing) => (
            FreeCashFlow {
                value: trailing,
                source: FcfSource::Trailing,
            },
            false,
        ),
        None => {
            let fiscal = operating_cash_flow
                .checked_sub(capital_expenditures)
                .ok_or_else(|| invalid("free_cash_flow", OUT_OF_RANGE))?
                .normalize();
            debug!(
                "No trailing FCF, falling back to FY {} OCF - capex",
                raw.fiscal_year
            );
            (
                FreeCashFlow {
                    value: to_f64(fiscal),
                    source: FcfSource::FiscalYear,
                },
                true,
            )
        }
    };

    let income_delta_pct =
        normalized_income.and_then(|n| relative_delta(to_f64(n), to_f64(net_income)));

    Ok(FinancialRecord {
        fiscal_year: raw.fiscal_year.trim().to_string(),
        total_revenue: scale("total_revenue", raw.total_revenue)?,
        net_income,
        normalized_income,
        operating_cash_flow,
        capital_expenditures,
        depreciation_amortization: scale_opt("depreciation_amortization", raw.depreciation_amortization)?,
        gain_on_sale: scale_opt("gain_on_sale", raw.gain_on_sale)?,
        dividends_paid: scale_opt("dividends_paid", raw.dividends_paid)?,
        shareholders_equity: scale_opt("shareholders_equity", raw.shareholders_equity)?,
        free_cash_flow,
        lagged,
        normalized_flag: normalized_income.is_some(),
        income_delta_pct,
        source: raw.source.clone(),
    })
}

fn validate_market(market: &MarketSnapshot) -> Result<(), ValuationError> {
    if !market.current_price.is_finite() || market.current_price <= 0.0 {
        return Err(invalid("current_price", "must be a positive number"));
    }
    if !market.market_cap.is_finite() || market.market_cap <= 0.0 {
        return Err(invalid("market_cap", "must be a positive number"));
    }

    let optional = [
        ("shares_outstanding", market.shares_outstanding),
        ("beta", market.beta),
        ("risk_free_rate", market.risk_free_rate),
        ("peg_ratio", market.peg_ratio),
        ("trailing_pe", market.trailing_pe),
        ("trailing_free_cash_flow", market.trailing_free_cash_flow),
        ("revenue_growth", market.revenue_growth),
        ("total_debt", market.total_debt),
        ("cash_and_equivalents", market.cash_and_equivalents),
    ];
    for (field, value) in optional {
        if matches!(value, Some(v) if !v.is_finite()) {
            return Err(invalid(field, "is not a finite number"));
        }
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ValuationError {
    ValuationError::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
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
            normalized_income: Some(dec!(130.5)),
            operating_cash_flow: dec!(150),
            capital_expenditures: dec!(-50),
            depreciation_amortization: Some(dec!(40)),
            gain_on_sale: None,
            dividends_paid: None,
            shareholders_equity: Some(dec!(800)),
            source: "10-K".to_string(),
        }
    }

    fn market() -> MarketSnapshot {
        let mut market = MarketSnapshot::new(20.0, 1_000_000_000.0);
        market.shares_outstanding = Some(50_000_000.0);
        market
    }

    #[test]
    fn test_scales_to_absolute_units() {
        let record = normalize(&raw(), &market()).unwrap();
        assert_eq!(record.total_revenue, dec!(1000000000));
        assert_eq!(record.net_income, dec!(100000000));
        assert_eq!(record.normalized_income, Some(dec!(130500000)));
        assert_eq!(record.depreciation_amortization, Some(dec!(40000000)));
    }

    #[test]
    fn test_capex_is_positive_outflow() {
        let record = normalize(&raw(), &market()).unwrap();
        assert_eq!(record.capital_expenditures, dec!(50000000));

        let mut positive = raw();
        positive.capital_expenditures = dec!(50);
        let record = normalize(&positive, &market()).unwrap();
        assert_eq!(record.capital_expenditures, dec!(50000000));
    }

    #[test]
    fn test_missing_unit_is_ambiguous() {
        let mut raw = raw();
        raw.unit = None;
        let err = normalize(&raw, &market()).unwrap_err();
        assert_eq!(err, ValuationError::UnitAmbiguity { field: "unit".to_string() });
    }

    #[test]
    fn test_fiscal_year_fallback_is_lagged() {
        let record = normalize(&raw(), &market()).unwrap();
        assert_eq!(record.free_cash_flow.source, FcfSource::FiscalYear);
        assert!(record.lagged);
        assert_relative_eq!(record.free_cash_flow.value, 100_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_trailing_fcf_preferred() {
        let mut market = market();
        market.trailing_free_cash_flow = Some(120_000_000.0);
        let record = normalize(&raw(), &market).unwrap();
        assert_eq!(record.free_cash_flow.source, FcfSource::Trailing);
        assert!(!record.lagged);
        assert_relative_eq!(record.free_cash_flow.value, 120_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_income_delta() {
        let record = normalize(&raw(), &market()).unwrap();
        assert!(record.normalized_flag);
        assert_relative_eq!(record.income_delta_pct.unwrap(), 0.305, epsilon = 1e-12);

        let mut gaap_only = raw();
        gaap_only.normalized_income = None;
        let record = normalize(&gaap_only, &market()).unwrap();
        assert!(!record.normalized_flag);
        assert!(record.income_delta_pct.is_none());
    }

    #[test]
    fn test_unit_choice_does_not_change_record() {
        let raw = raw();
        let market = market();
        let baseline = normalize(&raw, &market).unwrap();
        for target in [Magnitude::Units, Magnitude::Thousands, Magnitude::Billions] {
            let rescaled = raw.expressed_in(target).unwrap();
            assert_eq!(normalize(&rescaled, &market).unwrap(), baseline);
        }
    }

    #[test]
    fn test_rejects_bad_market_numbers() {
        let mut market = market();
        market.current_price = 0.0;
        let err = normalize(&raw(), &market).unwrap_err();
        assert!(matches!(err, ValuationError::InvalidInput { ref field, .. } if field == "current_price"));

        let mut market = self::market();
        market.beta = Some(f64::NAN);
        let err = normalize(&raw(), &market).unwrap_err();
        assert_eq!(err.field(), Some("beta"));
    }

    #[test]
    fn test_scaling_overflow_is_invalid_input() {
        let mut raw = raw();
        raw.unit = Some(Magnitude::Billions);
        raw.total_revenue = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        let err = normalize(&raw, &market()).unwrap_err();
        assert_eq!(
            err,
            ValuationError::InvalidInput {
                field: "total_revenue".to_string(),
                reason: "exceeds representable range".to_string(),
            }
        );
        assert_eq!(err.disposition(), valuation_core::ErrorDisposition::HumanReview);
    }

    #[test]
    fn test_rejects_blank_fiscal_year() {
        let mut raw = raw();
        raw.fiscal_year = "  ".to_string();
        assert!(matches!(
            normalize(&raw, &market()),
            Err(ValuationError::InvalidInput { .. })
        ));
    }
}
