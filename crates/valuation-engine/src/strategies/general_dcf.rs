use valuation_core::math::{discount_factor, perpetuity_value, present_value, project, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, MarketSnapshot, StrategyId, ValuationBasis, ValuationError,
    ValuationResult,
};

use super::{
    bound_growth, calibrate_growth, discount_rate, infer_growth, net_debt_bridge, price_multiples,
    require_convergent, require_shares, Valuation,
};

/// Multi-stage DCF: explicit projection at the market-implied growth rate,
/// Gordon terminal value, net-debt bridge to equity.
///
/// Free cash flow is the primary base. When it is not positive the company is
/// valued on earnings instead (normalized income when reported), discounted at
/// the same cost of equity with no debt bridge. With `blend_earnings_track` the
/// two tracks are averaged whenever both bases are positive.
pub fn value(
    record: &FinancialRecord,
    market: &MarketSnapshot,
    config: &EngineConfig,
) -> Result<ValuationResult, ValuationError> {
    let mut notes = Vec::new();
    let multiples = price_multiples(record, market, config, &mut notes);

    let fcf = record.free_cash_flow.value;
    let earnings = to_f64(record.earnings());
    let basis = match (fcf > 0.0, earnings > 0.0) {
        (true, true) if config.blend_earnings_track => ValuationBasis::Blended,
        (true, _) => ValuationBasis::FreeCashFlow,
        (false, true) => ValuationBasis::Earnings,
        (false, false) => {
            return Err(ValuationError::NonPositiveBase {
                metric: "free_cash_flow".to_string(),
                value: fcf,
            })
        }
    };

    if basis == ValuationBasis::Earnings {
        let kind = if record.normalized_income.is_some() { "normalized" } else { "GAAP" };
        notes.push(format!(
            "FCF {:.0} is not positive; valued on {} earnings {:.0}",
            fcf, kind, earnings
        ));
    } else if record.lagged {
        notes.push(format!(
            "No trailing FCF; projecting from FY {} operating cash flow less capex",
            record.fiscal_year
        ));
    }

    let shares = require_shares(market)?;
    let rates = discount_rate(market, config, &mut notes);
    require_convergent(rates.rate, config.terminal_growth)?;

    let growth = infer_growth(multiples.growth_pe(), market, config);
    let growth = calibrate_growth(growth, record, market, config, &mut notes);
    let growth = bound_growth(growth, config, &mut notes);

    let (track, equity_value) = match basis {
        ValuationBasis::Earnings => {
            let track = discounted_track(earnings, growth.rate, rates.rate, config)?;
            let equity_value = track.present_value;
            (track, equity_value)
        }
        ValuationBasis::Blended => {
            let fcf_track = discounted_track(fcf, growth.rate, rates.rate, config)?;
            let earnings_track = discounted_track(earnings, growth.rate, rates.rate, config)?;
            let fcf_equity = net_debt_bridge(fcf_track.present_value, market, &mut notes);
            notes.push(format!(
                "Blended FCF equity {:.0} with earnings equity {:.0}",
                fcf_equity, earnings_track.present_value
            ));
            let equity_value = (fcf_equity + earnings_track.present_value) / 2.0;
            (fcf_track, equity_value)
        }
        _ => {
            let track = discounted_track(fcf, growth.rate, rates.rate, config)?;
            let equity_value = net_debt_bridge(track.present_value, market, &mut notes);
            (track, equity_value)
        }
    };

    Ok(Valuation {
        strategy: StrategyId::GeneralDcf,
        basis,
        record,
        market,
        multiples,
        rates,
        growth,
        projected: track.projected,
        terminal_value: track.terminal_value,
        equity_value,
        shares,
        notes,
    }
    .finish())
}

struct Track {
    projected: Vec<f64>,
    terminal_value: f64,
    /// Explicit flows plus discounted terminal value
    present_value: f64,
}

fn discounted_track(
    base: f64,
    growth: f64,
    rate: f64,
    config: &EngineConfig,
) -> Result<Track, ValuationError> {
    let projected = project(base, growth, config.projection_years);
    let final_flow = projected.last().copied().unwrap_or(base);
    let terminal_value = perpetuity_value(final_flow, rate, config.terminal_growth).ok_or(
        ValuationError::InvalidDiscountRate {
            discount_rate: rate,
            terminal_growth: config.terminal_growth,
        },
    )?;
    let present_value = present_value(&projected, rate)
        + terminal_value * discount_factor(rate, config.projection_years);
    Ok(Track {
        projected,
        terminal_value,
        present_value,
    })
}
