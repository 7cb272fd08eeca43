use serde::{Deserialize, Serialize};

use crate::ValuationError;

/// Longest explicit forecast horizon a model will project.
pub const MAX_PROJECTION_YEARS: u32 = 50;

/// Tunable parameters for the valuation models and the insight reviewer.
///
/// Defaults reproduce the house methodology. A copy travels with every run so a
/// resumed run keeps the thresholds it started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Relative P/E move (TTM vs FY) that counts as a trend
    pub pe_trend_threshold: f64,
    /// Fixed equity risk premium for CAPM
    pub equity_risk_premium: f64,
    /// Spread added to the rounded-up risk-free rate for the hurdle floor
    pub hurdle_spread: f64,
    /// Used when the snapshot has no risk-free rate
    pub default_risk_free_rate: f64,
    /// Used when the snapshot has no beta
    pub default_beta: f64,
    /// Long-run perpetuity growth for terminal values
    pub terminal_growth: f64,
    pub projection_years: u32,
    /// Average the free-cash-flow and earnings tracks when both bases are positive
    pub blend_earnings_track: bool,
    /// Growth haircut when trailing FCF already exceeds fiscal-year FCF
    pub calibration_haircut: f64,
    /// Optional clamp applied to the inferred growth rate after calibration
    pub growth_floor: Option<f64>,
    pub growth_cap: Option<f64>,
    /// P/E tiers for growth inference when no PEG is available: (P/E above, growth)
    pub pe_growth_tiers: Vec<(f64, f64)>,
    pub default_growth: f64,
    /// Sustainable-growth ceiling for the dividend model
    pub max_dividend_growth: f64,
    /// P/FFO multiple applied to REIT funds from operations
    pub reit_target_multiple: f64,
    /// Upside strictly above this raises an investigation task
    pub upside_ceiling: f64,
    /// Upside strictly below this raises an investigation task
    pub downside_floor: f64,
    /// Normalized vs GAAP income divergence strictly above this raises a task
    pub income_divergence_threshold: f64,
    /// Typical discount-rate band used by the audit trail
    pub typical_discount_band: (f64, f64),
    /// Filing vs user-supplied revenue variance tolerated before a conflict is raised
    pub reconciliation_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pe_trend_threshold: 0.10,
            equity_risk_premium: 0.05,
            hurdle_spread: 0.055,
            default_risk_free_rate: 0.042,
            default_beta: 1.0,
            terminal_growth: 0.03,
            projection_years: 5,
            blend_earnings_track: false,
            calibration_haircut: 0.25,
            growth_floor: None,
            growth_cap: None,
            pe_growth_tiers: vec![(50.0, 0.25), (25.0, 0.15)],
            default_growth: 0.10,
            max_dividend_growth: 0.10,
            reit_target_multiple: 16.0,
            upside_ceiling: 1.00,
            downside_floor: -0.50,
            income_divergence_threshold: 0.20,
            typical_discount_band: (0.04, 0.15),
            reconciliation_tolerance: 0.05,
        }
    }
}

impl EngineConfig {
    /// GuruFocus-style growth bounds: 5% floor, 20% cap.
    pub fn with_growth_bounds(mut self, floor: f64, cap: f64) -> Self {
        self.growth_floor = Some(floor);
        self.growth_cap = Some(cap);
        self
    }

    pub fn validate(&self) -> Result<(), ValuationError> {
        if !(1..=MAX_PROJECTION_YEARS).contains(&self.projection_years) {
            return Err(ValuationError::InvalidConfig(format!(
                "projection_years must be between 1 and {MAX_PROJECTION_YEARS}"
            )));
        }
        if self.pe_trend_threshold < 0.0 {
            return Err(ValuationError::InvalidConfig(
                "pe_trend_threshold must be non-negative".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.calibration_haircut) {
            return Err(ValuationError::InvalidConfig(
                "calibration_haircut must be in [0, 1)".to_string(),
            ));
        }
        if self.downside_floor >= self.upside_ceiling {
            return Err(ValuationError::InvalidConfig(
                "downside_floor must be below upside_ceiling".to_string(),
            ));
        }
        if self.income_divergence_threshold < 0.0 {
            return Err(ValuationError::InvalidConfig(
                "income_divergence_threshold must be non-negative".to_string(),
            ));
        }
        if let (Some(floor), Some(cap)) = (self.growth_floor, self.growth_cap) {
            if floor > cap {
                return Err(ValuationError::InvalidConfig(format!(
                    "growth_floor {floor} exceeds growth_cap {cap}"
                )));
            }
        }
        if self.reconciliation_tolerance < 0.0 {
            return Err(ValuationError::InvalidConfig(
                "reconciliation_tolerance must be non-negative".to_string(),
            ));
        }
        if self.reit_target_multiple <= 0.0 {
            return Err(ValuationError::InvalidConfig(
                "reit_target_multiple must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upside_ceiling, 1.00);
        assert_eq!(config.downside_floor, -0.50);
        assert_eq!(config.income_divergence_threshold, 0.20);
        assert_eq!(config.pe_trend_threshold, 0.10);
        assert_eq!(config.reconciliation_tolerance, 0.05);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = EngineConfig::default().with_growth_bounds(0.20, 0.05);
        assert!(matches!(config.validate(), Err(ValuationError::InvalidConfig(_))));

        let config = EngineConfig {
            downside_floor: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            reconciliation_tolerance: -0.01,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_projection_years_bounded() {
        for years in [0, MAX_PROJECTION_YEARS + 1, 3_000_000_000] {
            let config = EngineConfig {
                projection_years: years,
                ..EngineConfig::default()
            };
            assert!(matches!(config.validate(), Err(ValuationError::InvalidConfig(_))));
        }
        let config = EngineConfig {
            projection_years: MAX_PROJECTION_YEARS,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"upside_ceiling": 1.5}"#).unwrap();
        assert_eq!(config.upside_ceiling, 1.5);
        assert_eq!(config.terminal_growth, 0.03);
    }
}
