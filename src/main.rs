//! tariffsim - run and compare tariff-impact simulations from the command line

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tariffsim::{
    analysis::SummaryAnalysisGenerator,
    cache::{spawn_cleanup_task, SimulationCache},
    config::{Args, Command},
    simulation::{SimulationOutput, TariffMeasure},
    store::InMemorySimulationStore,
    worker::LocalComputeWorker,
    RunRequest, SimulationOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so stdout carries only the JSON result
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tariffsim={},warn", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let cache = Arc::new(SimulationCache::new(args.cache_config()));
    let cleanup = spawn_cleanup_task(Arc::clone(&cache));
    let worker = Arc::new(LocalComputeWorker::new(args.worker_config()));
    let store = Arc::new(InMemorySimulationStore::new());

    let orchestrator = SimulationOrchestrator::new(
        args.orchestrator_config(),
        Arc::clone(&cache),
        worker.clone(),
        store,
        Arc::new(SummaryAnalysisGenerator::new()),
    );

    let outcome = match &args.command {
        Command::Run {
            scenario,
            rate,
            product_code,
            name,
        } => {
            let measure = match (rate, product_code) {
                (Some(tariff_rate), _) => TariffMeasure::Rate {
                    tariff_rate: *tariff_rate,
                },
                (None, Some(code)) => TariffMeasure::ProductCode {
                    product_code: code.clone(),
                },
                (None, None) => anyhow::bail!("either --rate or --product-code is required"),
            };
            let config = scenario.to_config(measure);

            let output = run_to_end(&orchestrator, RunRequest::new(config), &args.actor).await?;
            if let Some(name) = name {
                orchestrator
                    .save_simulation(&output.input_id, name, None)
                    .await?;
            }
            serde_json::to_string_pretty(&output)?
        }

        Command::Compare {
            scenario,
            baseline_rate,
            rate,
        } => {
            let mut output_ids = Vec::new();
            for tariff_rate in [*baseline_rate, *rate] {
                let config = scenario.to_config(TariffMeasure::Rate { tariff_rate });
                let output =
                    run_to_end(&orchestrator, RunRequest::new(config), &args.actor).await?;
                output_ids.push(output.id);
            }

            let name = format!(
                "{}: {}% vs {}%",
                scenario.country.trim(),
                baseline_rate,
                rate
            );
            let comparison = orchestrator.compare(&output_ids, &name, None).await?;
            serde_json::to_string_pretty(&comparison)?
        }
    };

    println!("{}", outcome);

    let stats = cache.get_cache_stats();
    info!(
        size = stats.size,
        hits = stats.hits,
        misses = stats.misses,
        "Cache statistics"
    );

    worker.shutdown();
    cleanup.abort();
    Ok(())
}

/// Start a run and wait for it to finish; a failed run is an error
async fn run_to_end(
    orchestrator: &SimulationOrchestrator,
    request: RunRequest,
    actor: &str,
) -> anyhow::Result<SimulationOutput> {
    let started = orchestrator.start_run(request, actor).await?;
    info!(output_id = %started.id, status = %started.status, "Run started");

    let output = orchestrator.await_terminal(&started.id).await?;
    if let Some(error) = &output.error {
        anyhow::bail!("simulation {} failed: {}", output.id, error);
    }
    Ok(output)
}
