use chrono::Utc;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::{PipelineError, RunState, Stage};

/// Key-value checkpoint store for run state. One row per run, the whole state
/// as JSON, upserted after every step.
#[derive(Clone)]
pub struct RunStore {
    pool: AnyPool,
}

/// Listing row for suspended runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub ticker: String,
    pub stage: String,
    pub updated_at: String,
}

impl RunStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Connect and create the table if needed.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PipelineError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.init_tables().await?;
        Ok(store)
    }

    pub async fn init_tables(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis_runs (
                run_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                stage TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_runs_stage ON analysis_runs(stage)")
            .execute(&self.pool)
            .await
            .ok();

        Ok(())
    }

    pub async fn save(&self, state: &RunState) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO analysis_runs (run_id, ticker, stage, state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(run_id) DO UPDATE SET
                stage = excluded.stage,
                state = excluded.state,
                updated_at = excluded.updated_at",
        )
        .bind(state.run_id.clone())
        .bind(state.ticker.clone())
        .bind(state.stage.as_str())
        .bind(state.to_json()?)
        .bind(state.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<RunState>, PipelineError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT state FROM analysis_runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(json,)| RunState::from_json(&json)).transpose()
    }

    /// Runs parked at HUMAN_REVIEW or FEEDBACK, oldest first.
    pub async fn list_suspended(&self) -> Result<Vec<RunSummary>, PipelineError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT run_id, ticker, stage, updated_at FROM analysis_runs
             WHERE stage IN (?, ?) ORDER BY updated_at ASC",
        )
        .bind(Stage::HumanReview.as_str())
        .bind(Stage::Feedback.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(run_id, ticker, stage, updated_at)| RunSummary {
                run_id,
                ticker,
                stage,
                updated_at,
            })
            .collect())
    }
}
