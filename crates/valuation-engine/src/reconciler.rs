use rust_decimal::Decimal;
use tracing::debug;
use valuation_core::math::to_f64;
use valuation_core::{DataConflict, Magnitude, RawFinancials, ValuationError};

/// Outcome of comparing filing figures with the user's own.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Within tolerance; the user's figures stand as an expert override.
    Agreed { variance: f64 },
    Conflict(DataConflict),
}

/// Compare revenue between the filing and user-supplied financials, both taken
/// to absolute units first. A variance strictly above `tolerance` is a conflict
/// that only a human can settle.
pub fn reconcile(
    filing: &RawFinancials,
    user: &RawFinancials,
    tolerance: f64,
) -> Result<Reconciliation, ValuationError> {
    let filing_revenue = filing.expressed_in(Magnitude::Units)?.total_revenue.normalize();
    let user_revenue = user.expressed_in(Magnitude::Units)?.total_revenue.normalize();

    let variance = revenue_variance(filing_revenue, user_revenue);
    debug!(
        "Revenue reconciliation: filing {} vs user {} ({:.2}%)",
        filing_revenue,
        user_revenue,
        variance * 100.0
    );

    if variance > tolerance {
        Ok(Reconciliation::Conflict(DataConflict {
            field: "total_revenue".to_string(),
            filing: filing_revenue,
            user: user_revenue,
            variance,
        }))
    } else {
        Ok(Reconciliation::Agreed { variance })
    }
}

/// |filing - user| / |filing|. A zero filing only agrees with a zero user figure.
fn revenue_variance(filing: Decimal, user: Decimal) -> f64 {
    if filing.is_zero() {
        return if user.is_zero() { 0.0 } else { f64::INFINITY };
    }
    to_f64((filing - user).abs()) / to_f64(filing.abs())
}
