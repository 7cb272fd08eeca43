use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use valuation_core::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Persistence
    pub database_url: String,
    pub db_max_connections: u32,

    // Batch runs
    pub batch_concurrency: usize,          // 4 tickers in flight

    // Hold every report at FEEDBACK until approved
    pub feedback_gate: bool,

    // Valuation and review thresholds, snapshotted into every run
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let mut engine = EngineConfig {
            pe_trend_threshold: read(&lookup, "ANALYST_PE_TREND_THRESHOLD", defaults.pe_trend_threshold)?,
            equity_risk_premium: read(&lookup, "ANALYST_EQUITY_RISK_PREMIUM", defaults.equity_risk_premium)?,
            hurdle_spread: read(&lookup, "ANALYST_HURDLE_SPREAD", defaults.hurdle_spread)?,
            default_risk_free_rate: read(&lookup, "ANALYST_DEFAULT_RISK_FREE_RATE", defaults.default_risk_free_rate)?,
            default_beta: read(&lookup, "ANALYST_DEFAULT_BETA", defaults.default_beta)?,
            terminal_growth: read(&lookup, "ANALYST_TERMINAL_GROWTH", defaults.terminal_growth)?,
            projection_years: read(&lookup, "ANALYST_PROJECTION_YEARS", defaults.projection_years)?,
            blend_earnings_track: read(&lookup, "ANALYST_BLEND_EARNINGS_TRACK", defaults.blend_earnings_track)?,
            default_growth: read(&lookup, "ANALYST_DEFAULT_GROWTH", defaults.default_growth)?,
            reit_target_multiple: read(&lookup, "ANALYST_REIT_TARGET_MULTIPLE", defaults.reit_target_multiple)?,
            upside_ceiling: read(&lookup, "ANALYST_UPSIDE_CEILING", defaults.upside_ceiling)?,
            downside_floor: read(&lookup, "ANALYST_DOWNSIDE_FLOOR", defaults.downside_floor)?,
            income_divergence_threshold: read(&lookup, "ANALYST_INCOME_DIVERGENCE_THRESHOLD", defaults.income_divergence_threshold)?,
            reconciliation_tolerance: read(&lookup, "ANALYST_RECONCILIATION_TOLERANCE", defaults.reconciliation_tolerance)?,
            ..defaults
        };

        // Both bounds or neither
        match (lookup("ANALYST_GROWTH_FLOOR"), lookup("ANALYST_GROWTH_CAP")) {
            (Some(floor), Some(cap)) => {
                let floor: f64 = floor.parse().context("ANALYST_GROWTH_FLOOR is not a number")?;
                let cap: f64 = cap.parse().context("ANALYST_GROWTH_CAP is not a number")?;
                engine = engine.with_growth_bounds(floor, cap);
            }
            (None, None) => {}
            _ => anyhow::bail!("ANALYST_GROWTH_FLOOR and ANALYST_GROWTH_CAP must be set together"),
        }

        engine.validate().context("Invalid valuation thresholds")?;

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://equity_analyst.db?mode=rwc".to_string()),
            db_max_connections: read(&lookup, "ANALYST_DB_MAX_CONNECTIONS", 5)?,
            batch_concurrency: read(&lookup, "ANALYST_BATCH_CONCURRENCY", 4)?,
            feedback_gate: read(&lookup, "ANALYST_FEEDBACK_GATE", false)?,
            engine,
        })
    }
}

fn read<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
