//! Configuration for tariffsim
//!
//! CLI arguments and environment variable handling using clap. Every tunable
//! has an environment fallback so a `.env` file can drive the binary.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::simulation::{SimulationConfig, TariffMeasure};
use crate::worker::WorkerConfig;

/// tariffsim - Monte Carlo tariff-impact simulations with result caching
#[derive(Parser, Debug, Clone)]
#[command(name = "tariffsim")]
#[command(about = "Run and compare tariff-impact simulations")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,

    /// Who the runs are attributed to
    #[arg(long, env = "SIM_ACTOR", default_value = "cli", global = true)]
    pub actor: String,

    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(flatten)]
    pub worker: WorkerArgs,

    /// Event loop tick and status poll interval in milliseconds
    #[arg(long, env = "SIM_POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,

    /// Hard deadline for a single run in seconds
    #[arg(long, env = "SIM_RUN_TIMEOUT_SECS", default_value = "300")]
    pub run_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Simulation cache settings
#[derive(ClapArgs, Debug, Clone)]
pub struct CacheArgs {
    /// Maximum number of cached results
    #[arg(long, env = "SIM_CACHE_MAX_ENTRIES", default_value = "100")]
    pub cache_max_entries: usize,

    /// Lifetime of a cached result in seconds
    #[arg(long, env = "SIM_CACHE_TTL_SECS", default_value = "3600")]
    pub cache_ttl_secs: u64,

    /// Interval of the expiry sweep in seconds
    #[arg(long, env = "SIM_CACHE_CLEANUP_SECS", default_value = "60")]
    pub cache_cleanup_secs: u64,
}

/// Local compute worker settings
#[derive(ClapArgs, Debug, Clone)]
pub struct WorkerArgs {
    /// Jobs the local worker runs at once
    #[arg(long, env = "SIM_WORKER_MAX_JOBS", default_value = "4")]
    pub worker_max_jobs: usize,

    /// Monte Carlo draws per run
    #[arg(long, env = "SIM_WORKER_ITERATIONS", default_value = "10000")]
    pub iterations: usize,

    /// Progress events per run
    #[arg(long, env = "SIM_WORKER_PROGRESS_STEPS", default_value = "10")]
    pub progress_steps: usize,

    /// Pause between batches of draws in milliseconds
    #[arg(long, env = "SIM_WORKER_BATCH_INTERVAL_MS", default_value = "5")]
    pub batch_interval_ms: u64,
}

/// Scenario parameters shared by both subcommands
#[derive(ClapArgs, Debug, Clone)]
pub struct ScenarioArgs {
    /// Importing country
    #[arg(long)]
    pub country: String,

    /// Projection horizon in months
    #[arg(long, default_value = "12")]
    pub horizon_months: u32,

    /// Affected product category (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Scenario tag such as "retaliation" (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Confidence level of the reported interval
    #[arg(long, default_value = "0.95")]
    pub confidence: f64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one simulation and print the completed output
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Tariff rate in percent
        #[arg(long, conflicts_with = "product_code", required_unless_present = "product_code")]
        rate: Option<f64>,

        /// HS product code; the rate is looked up by chapter
        #[arg(long)]
        product_code: Option<String>,

        /// Save the simulation under this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Run a baseline and an alternative rate, then compare them
    Compare {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Baseline tariff rate in percent
        #[arg(long)]
        baseline_rate: f64,

        /// Alternative tariff rate in percent
        #[arg(long)]
        rate: f64,
    },
}

impl ScenarioArgs {
    /// Build a simulation config for one measure
    pub fn to_config(&self, measure: TariffMeasure) -> SimulationConfig {
        SimulationConfig {
            country: self.country.clone(),
            time_horizon_months: self.horizon_months,
            measure,
            product_categories: self.categories.clone(),
            scenario_tags: self.tags.clone(),
            confidence_level: self.confidence,
        }
    }
}

impl Args {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache.cache_max_entries,
            default_ttl: Duration::from_secs(self.cache.cache_ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cache_cleanup_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            ..OrchestratorConfig::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrent_jobs: self.worker.worker_max_jobs,
            iterations: self.worker.iterations,
            progress_steps: self.worker.progress_steps,
            batch_interval: Duration::from_millis(self.worker.batch_interval_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.cache_max_entries == 0 {
            return Err("SIM_CACHE_MAX_ENTRIES must be at least 1".to_string());
        }
        if self.cache.cache_cleanup_secs == 0 {
            return Err("SIM_CACHE_CLEANUP_SECS must be at least 1".to_string());
        }
        if self.worker.worker_max_jobs == 0 {
            return Err("SIM_WORKER_MAX_JOBS must be at least 1".to_string());
        }
        if self.worker.iterations == 0 {
            return Err("SIM_WORKER_ITERATIONS must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("SIM_POLL_INTERVAL_MS must be at least 1".to_string());
        }
        if self.run_timeout_secs == 0 {
            return Err("SIM_RUN_TIMEOUT_SECS must be at least 1".to_string());
        }
        Ok(())
    }
}
