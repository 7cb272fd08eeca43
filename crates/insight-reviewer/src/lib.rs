//! Anomaly rules over a finished valuation.
//!
//! Each rule is evaluated independently and every rule that fires appends one
//! investigation task, in rule order. Boundaries are exclusive: an upside of
//! exactly 100% or a divergence of exactly 20% raises nothing.

use tracing::{debug, info};
use valuation_core::math::{relative_delta, to_f64};
use valuation_core::{
    EngineConfig, FinancialRecord, InvestigationTask, TaskQueue, TaskRationale, ValuationError,
    ValuationResult,
};

pub const EXTREME_VALUATION_DIRECTIVE: &str =
    "valuation upside is extreme; verify model inputs and peer multiples.";
pub const INCOME_DIVERGENCE_DIRECTIVE: &str =
    "explain the divergence between normalized and reported net income (one-time items).";

pub struct InsightReviewer {
    upside_ceiling: f64,
    downside_floor: f64,
    income_divergence_threshold: f64,
    typical_discount_band: (f64, f64),
}

impl InsightReviewer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            upside_ceiling: config.upside_ceiling,
            downside_floor: config.downside_floor,
            income_divergence_threshold: config.income_divergence_threshold,
            typical_discount_band: config.typical_discount_band,
        }
    }

    /// Tasks raised by the valuation, in detection order. Empty means nothing
    /// needs targeted research.
    pub fn review(&self, result: &ValuationResult, record: &FinancialRecord) -> Vec<InvestigationTask> {
        let mut tasks = Vec::new();

        if let Some(rationale) = self.upside_rule(result.upside_pct) {
            info!(
                "Upside {:.1}% outside [{:.0}%, {:.0}%]",
                result.upside_pct * 100.0,
                self.downside_floor * 100.0,
                self.upside_ceiling * 100.0
            );
            tasks.push(InvestigationTask::new(EXTREME_VALUATION_DIRECTIVE, rationale));
        }

        if let Some(delta) = self.income_divergence(record) {
            info!("Normalized income diverges from GAAP by {:.1}%", delta * 100.0);
            tasks.push(InvestigationTask::new(
                INCOME_DIVERGENCE_DIRECTIVE,
                TaskRationale::IncomeDivergence,
            ));
        }

        debug!("Review raised {} task(s)", tasks.len());
        tasks
    }

    /// Append review output to a run's queue. Fails once research has sealed it.
    pub fn review_into(
        &self,
        result: &ValuationResult,
        record: &FinancialRecord,
        queue: &mut TaskQueue,
    ) -> Result<(), ValuationError> {
        queue.extend(self.review(result, record))
    }

    fn upside_rule(&self, upside: f64) -> Option<TaskRationale> {
        if upside > self.upside_ceiling {
            Some(TaskRationale::ExtremeUpside)
        } else if upside < self.downside_floor {
            Some(TaskRationale::ExtremeDownside)
        } else {
            None
        }
    }

    /// Relative gap between normalized and GAAP income when it exceeds the
    /// threshold. Zero GAAP with any normalized income counts as infinite.
    fn income_divergence(&self, record: &FinancialRecord) -> Option<f64> {
        let normalized = to_f64(record.normalized_income?);
        let gaap = to_f64(record.net_income);
        let delta = match relative_delta(normalized, gaap) {
            Some(delta) => delta.abs(),
            None if normalized != 0.0 => f64::INFINITY,
            None => return None,
        };
        (delta > self.income_divergence_threshold).then_some(delta)
    }

    /// Calculation audit trail. Informational only, never turned into tasks.
    pub fn audit(&self, result: &ValuationResult) -> Vec<String> {
        let mut trail = Vec::new();
        let (low, high) = self.typical_discount_band;

        if result.discount_rate < low || result.discount_rate > high {
            trail.push(format!(
                "Discount rate {:.2}% is outside the typical {:.0}%-{:.0}% band",
                result.discount_rate * 100.0,
                low * 100.0,
                high * 100.0
            ));
        }
        if result.lagged {
            trail.push(
                "Free cash flow is fiscal-year data; no trailing figure was available".to_string(),
            );
        }
        if result.growth_calibrated {
            trail.push(format!(
                "Growth calibrated down to {:.2}% because trailing FCF already exceeds the fiscal year",
                result.implied_growth_rate * 100.0
            ));
        }
        if result.pe_ratio_fy.is_none() || result.pe_ratio_ttm.is_none() {
            trail.push(format!(
                "P/E trend {} is a default; FY and TTM multiples were not both available",
                result.pe_trend.label()
            ));
        }
        trail
    }
}

impl Default for InsightReviewer {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}
