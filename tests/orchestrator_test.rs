//! End-to-end lifecycle tests with the local Monte Carlo worker
//!
//! Every run here goes through the real worker, cache, store, and analysis
//! generator, wired the same way the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use tariffsim::analysis::SummaryAnalysisGenerator;
use tariffsim::cache::{CacheConfig, SimulationCache};
use tariffsim::simulation::{RunStatus, SimulationConfig, TariffMeasure};
use tariffsim::store::{InMemorySimulationStore, SimulationStore};
use tariffsim::worker::{LocalComputeWorker, TariffImpactSummary, WorkerConfig};
use tariffsim::{OrchestratorConfig, RunRequest, SimulationOrchestrator};

fn setup(worker_config: WorkerConfig) -> (SimulationOrchestrator, Arc<InMemorySimulationStore>) {
    let store = Arc::new(InMemorySimulationStore::new());
    let orchestrator = SimulationOrchestrator::new(
        OrchestratorConfig {
            poll_interval: Duration::from_millis(5),
            run_timeout: Duration::from_secs(30),
            ..OrchestratorConfig::default()
        },
        Arc::new(SimulationCache::new(CacheConfig::default())),
        Arc::new(LocalComputeWorker::new(worker_config)),
        store.clone(),
        Arc::new(SummaryAnalysisGenerator::new()),
    );
    (orchestrator, store)
}

fn quick_worker() -> WorkerConfig {
    WorkerConfig {
        max_concurrent_jobs: 2,
        iterations: 500,
        progress_steps: 5,
        batch_interval: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_run_produces_summary_and_analysis() {
    let (orchestrator, store) = setup(quick_worker());
    let mut config = SimulationConfig::with_rate("Vietnam", 10.0);
    config.product_categories = vec!["textiles".into(), "electronics".into()];

    let started = orchestrator
        .start_run(RunRequest::new(config), "analyst")
        .await
        .unwrap();
    let done = orchestrator.await_terminal(&started.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    let summary: TariffImpactSummary =
        serde_json::from_value(done.results.clone().unwrap()).unwrap();
    assert_eq!(summary.iterations, 500);
    assert!(summary.lower_bound_pct <= summary.upper_bound_pct);

    let analysis = done.analysis.as_ref().unwrap();
    assert!(analysis.summary.contains("Vietnam"));
    assert!(!analysis.recommendations.is_empty());

    assert_eq!(store.get_output(&done.id).await.unwrap(), Some(done));
}

#[tokio::test]
async fn test_equivalent_parameters_hit_the_cache() {
    let (orchestrator, _) = setup(quick_worker());

    let mut first = SimulationConfig::with_rate("Vietnam", 5.0);
    first.product_categories = vec!["steel".into(), "textiles".into()];
    let mut second = SimulationConfig::with_rate(" vietnam ", 5.0);
    second.product_categories = vec!["Textiles".into(), "steel".into(), "steel".into()];

    let run = orchestrator
        .start_run(RunRequest::new(first), "analyst")
        .await
        .unwrap();
    let computed = orchestrator.await_terminal(&run.id).await.unwrap();

    let cached = orchestrator
        .start_run(RunRequest::new(second), "analyst")
        .await
        .unwrap();
    assert_eq!(cached.status, RunStatus::Completed);
    assert!(cached.from_cache);
    assert_eq!(cached.results, computed.results);

    let stats = orchestrator.cache().get_cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_saturated_worker_fails_new_runs() {
    let (orchestrator, _) = setup(WorkerConfig {
        max_concurrent_jobs: 1,
        iterations: 1_000_000,
        progress_steps: 1000,
        batch_interval: Duration::from_millis(50),
    });

    let busy = orchestrator
        .start_run(RunRequest::new(SimulationConfig::with_rate("Vietnam", 3.5)), "a")
        .await
        .unwrap();
    assert_eq!(busy.status, RunStatus::Running);

    let refused = orchestrator
        .start_run(RunRequest::new(SimulationConfig::with_rate("Thailand", 3.5)), "b")
        .await
        .unwrap();
    assert_eq!(refused.status, RunStatus::Failed);
    assert_eq!(refused.error.as_deref(), Some("worker unavailable"));

    orchestrator.stop(&busy.id).await.unwrap();
}

#[tokio::test]
async fn test_compare_two_rates_end_to_end() {
    let (orchestrator, store) = setup(quick_worker());

    let mut ids = Vec::new();
    for rate in [3.5, 5.0] {
        let started = orchestrator
            .start_run(RunRequest::new(SimulationConfig::with_rate("Vietnam", rate)), "analyst")
            .await
            .unwrap();
        ids.push(orchestrator.await_terminal(&started.id).await.unwrap().id);
    }

    let comparison = orchestrator
        .compare(&ids, "Vietnam 3.5 vs 5.0", Some("rate sensitivity".into()))
        .await
        .unwrap();

    let rate = &comparison.parameter_differences["tariff_rate"];
    assert_eq!(rate.len(), 1);
    assert!(rate[0].percentage_difference > 0.0);
    for (key, cells) in &comparison.parameter_differences {
        if key != "tariff_rate" {
            assert!(cells[0].is_zero(), "{} should not differ", key);
        }
    }
    assert!(comparison.result_differences["effective_tariff_rate"][0].absolute_difference > 0.0);
    assert!(store.get_comparison(&comparison.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_case_variant_countries_compare_as_identical() {
    let (orchestrator, _) = setup(quick_worker());

    let mut ids = Vec::new();
    for country in ["Vietnam", " VIETNAM "] {
        let started = orchestrator
            .start_run(RunRequest::new(SimulationConfig::with_rate(country, 3.5)), "analyst")
            .await
            .unwrap();
        ids.push(orchestrator.await_terminal(&started.id).await.unwrap().id);
    }
    assert_eq!(orchestrator.cache().get_cache_stats().hits, 1);

    let comparison = orchestrator.compare(&ids, "same scenario", None).await.unwrap();
    assert!(comparison.parameters_identical());
    for (key, cells) in &comparison.result_differences {
        assert!(cells[0].is_zero(), "{} should not differ", key);
    }
}

#[tokio::test]
async fn test_product_code_runs_are_not_comparable_with_rate_runs() {
    let (orchestrator, _) = setup(quick_worker());

    let mut code = SimulationConfig::with_rate("Vietnam", 0.0);
    code.measure = TariffMeasure::ProductCode {
        product_code: "7208.10".into(),
    };

    let mut ids = Vec::new();
    for config in [SimulationConfig::with_rate("Vietnam", 3.5), code] {
        let started = orchestrator
            .start_run(RunRequest::new(config), "analyst")
            .await
            .unwrap();
        ids.push(orchestrator.await_terminal(&started.id).await.unwrap().id);
    }

    assert!(orchestrator.compare(&ids, "mixed", None).await.is_err());
}

#[tokio::test]
async fn test_stop_abandons_run_and_frees_input() {
    let (orchestrator, _) = setup(WorkerConfig {
        iterations: 1_000_000,
        progress_steps: 1000,
        batch_interval: Duration::from_millis(20),
        ..quick_worker()
    });

    let params = SimulationConfig::with_rate("Singapore", 7.0);
    let started = orchestrator
        .start_run(RunRequest::new(params.clone()), "analyst")
        .await
        .unwrap();
    let stopped = orchestrator.stop(&started.id).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some("stopped by user"));

    let final_state = orchestrator.await_terminal(&started.id).await.unwrap();
    assert_eq!(final_state.status, RunStatus::Failed);
    assert!(!orchestrator.cache().contains(&params));
    assert_eq!(orchestrator.active_run_count(), 0);
}
