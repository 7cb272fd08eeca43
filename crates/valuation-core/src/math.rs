//! Shared discounting and compounding helpers.
//!
//! Rates are fractions (0.08 = 8%). Flows are indexed from year 1, so the first
//! element of a projection is discounted one full period.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Tolerance used when rounding rates expressed in percent, so 4.0000000001% stays 4%.
const PERCENT_EPSILON: f64 = 1e-9;

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Compound `base` for `years` periods: [base*(1+g), base*(1+g)^2, ...].
pub fn project(base: f64, growth: f64, years: u32) -> Vec<f64> {
    (1..=years as i32)
        .map(|i| base * (1.0_f64 + growth).powi(i))
        .collect()
}

pub fn discount_factor(rate: f64, year: u32) -> f64 {
    1.0 / (1.0_f64 + rate).powi(year as i32)
}

/// Present value of year-indexed flows.
pub fn present_value(flows: &[f64], rate: f64) -> f64 {
    flows
        .iter()
        .enumerate()
        .map(|(i, flow)| flow * discount_factor(rate, i as u32 + 1))
        .sum()
}

/// Gordon perpetuity on the year after `final_flow`. None when the series diverges.
pub fn perpetuity_value(final_flow: f64, rate: f64, growth: f64) -> Option<f64> {
    if rate <= growth {
        return None;
    }
    Some(final_flow * (1.0 + growth) / (rate - growth))
}

/// (value - reference) / |reference|. None when the reference is zero.
pub fn relative_delta(value: f64, reference: f64) -> Option<f64> {
    if reference.abs() < f64::EPSILON {
        return None;
    }
    Some((value - reference) / reference.abs())
}

/// Round a rate up to the next whole percentage point.
pub fn ceil_to_whole_percent(rate: f64) -> f64 {
    ((rate * 100.0) - PERCENT_EPSILON).ceil() / 100.0
}
