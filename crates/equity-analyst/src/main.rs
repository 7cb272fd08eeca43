use std::sync::Arc;

use anyhow::{Context, Result};
use research_orchestrator::{
    Collaborators, CorrectedInput, Pipeline, Resolution, RunState, RunStore, Stage,
};

mod cli;
mod config;
mod fixtures;

use cli::Command;
use config::AppConfig;
use fixtures::{Fixture, FixtureDesk, SummaryWriter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = cli::parse_args(&args)?;

    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!(
        "  Review bands: upside > {:.0}%, downside < {:.0}%",
        config.engine.upside_ceiling * 100.0,
        config.engine.downside_floor * 100.0
    );

    let store = RunStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to open run store")?;

    match command {
        Command::Start { fixture, strategy } => {
            let fixture = Fixture::load(&fixture)?;
            let ticker = fixture.ticker.clone();
            let pipeline = pipeline(FixtureDesk::new(vec![fixture]), &config, store)?;
            let state = pipeline.start(&ticker, strategy.as_deref()).await?;
            print_run(&state);
        }
        Command::Batch { fixtures } => {
            let loaded = fixtures
                .iter()
                .map(|path| Fixture::load(path))
                .collect::<Result<Vec<_>>>()?;
            let tickers: Vec<String> = loaded.iter().map(|f| f.ticker.clone()).collect();
            let pipeline = Arc::new(pipeline(FixtureDesk::new(loaded), &config, store)?);

            for (ticker, outcome) in pipeline.analyze_batch(tickers, config.batch_concurrency).await {
                match outcome {
                    Ok(state) => print_run(&state),
                    Err(e) => println!("{}: run failed: {}", ticker, e),
                }
            }
        }
        Command::Resume { run_id, corrections } => {
            let json = std::fs::read_to_string(&corrections)
                .with_context(|| format!("Failed to read {}", corrections.display()))?;
            let corrections: CorrectedInput =
                serde_json::from_str(&json).context("Invalid corrections file")?;

            let state = load_run(&store, &run_id).await?;
            let desk = FixtureDesk::new(vec![Fixture::from_state(&state)]);
            let pipeline = pipeline(desk, &config, store)?;
            let state = pipeline.resume(state, Resolution::Supply(corrections)).await?;
            print_run(&state);
        }
        Command::Choose { run_id, source } => {
            let state = load_run(&store, &run_id).await?;
            let desk = FixtureDesk::new(vec![Fixture::from_state(&state)]);
            let pipeline = pipeline(desk, &config, store)?;
            let state = pipeline.resume(state, Resolution::Choose(source)).await?;
            print_run(&state);
        }
        Command::Approve { run_id } => {
            let state = load_run(&store, &run_id).await?;
            let pipeline = pipeline(FixtureDesk::default(), &config, store)?;
            let state = pipeline.resume(state, Resolution::Approve).await?;
            print_run(&state);
        }
        Command::Revise { run_id, note } => {
            let state = load_run(&store, &run_id).await?;
            let desk = FixtureDesk::new(vec![Fixture::from_state(&state)]);
            let pipeline = pipeline(desk, &config, store)?;
            let state = pipeline.resume(state, Resolution::ReviseNarrative(note)).await?;
            print_run(&state);
        }
        Command::Recalculate { run_id } => {
            let state = load_run(&store, &run_id).await?;
            let desk = FixtureDesk::new(vec![Fixture::from_state(&state)]);
            let pipeline = pipeline(desk, &config, store)?;
            let update = Resolution::UpdateParameters(config.engine.clone());
            let state = pipeline.resume(state, update).await?;
            print_run(&state);
        }
        Command::Abandon { run_id } => {
            let state = load_run(&store, &run_id).await?;
            let pipeline = pipeline(FixtureDesk::default(), &config, store)?;
            let state = pipeline.resume(state, Resolution::Abandon).await?;
            print_run(&state);
        }
        Command::Show { run_id } => {
            let state = load_run(&store, &run_id).await?;
            print_run(&state);
            if let Some(result) = &state.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        Command::Pending => {
            let pending = store.list_suspended().await?;
            if pending.is_empty() {
                println!("No runs awaiting review or feedback");
            }
            for run in pending {
                println!("{}  {:<6}  {}  {}", run.run_id, run.ticker, run.stage, run.updated_at);
            }
        }
    }

    Ok(())
}

fn pipeline(desk: FixtureDesk, config: &AppConfig, store: RunStore) -> Result<Pipeline> {
    let desk = Arc::new(desk);
    let collaborators = Collaborators {
        profiler: desk.clone(),
        filings: desk.clone(),
        market_data: desk.clone(),
        researcher: desk.clone(),
        writer: Arc::new(SummaryWriter),
    };
    Ok(Pipeline::new(collaborators, config.engine.clone())?
        .with_user_data(desk)
        .with_feedback_gate(config.feedback_gate)
        .with_store(store))
}

async fn load_run(store: &RunStore, run_id: &str) -> Result<RunState> {
    store
        .load(run_id)
        .await?
        .with_context(|| format!("No run with id {}", run_id))
}

fn print_run(state: &RunState) {
    let strategy = state
        .strategy
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{}  {}  {}  {}", state.run_id, state.ticker, strategy, state.stage);

    match state.stage {
        Stage::HumanReview => {
            if let Some(failure) = &state.failure {
                println!("  awaiting review at {}: {}", failure.stage, failure.message);
                if let Some(field) = &failure.field {
                    println!("  field: {}", field);
                }
            }
            if let Some(conflict) = &state.conflict {
                println!("  settle with: equity-analyst choose {} filing|user", state.run_id);
                println!("  ({})", conflict.describe());
            }
            println!("  resume with: equity-analyst resume {} <corrections.json>", state.run_id);
        }
        Stage::Feedback => {
            println!("  report drafted; reply with one of:");
            println!("    equity-analyst approve {}", state.run_id);
            println!("    equity-analyst revise {} <note>", state.run_id);
            println!("    equity-analyst recalculate {}", state.run_id);
        }
        Stage::Error => {
            if let Some(failure) = &state.failure {
                println!("  failed at {} [{}]: {}", failure.stage, failure.code, failure.message);
            }
        }
        _ => {}
    }

    for limitation in &state.limitations {
        println!("  limitation: {}", limitation.message);
    }
    if let Some(report) = &state.report {
        println!();
        println!("{}", report.markdown);
    }
}
