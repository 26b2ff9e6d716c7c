//! Simulation Lifecycle Orchestrator
//!
//! Owns every run from `start_run` to a terminal status.
//!
//! ```text
//! start_run ──► cache hit? ──yes──► completed (no worker call)
//!                   │
//!                   no
//!                   ▼
//!             worker.dispatch ──unavailable──► failed
//!                   │
//!                   ▼
//!        event loop: progress / complete / error
//!                    + poll tick + hard deadline
//! ```
//!
//! Live runs are kept in an in-process table which is the source of truth
//! while a run is active. The store is written after every change, and a run
//! leaves the table once its terminal state is stored. A failed output write
//! is logged and keeps the run in the table, which then serves its latest state.

mod lifecycle;

pub use lifecycle::SimulationOrchestrator;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::simulation::{RunStatus, SimulationConfig};

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tick of the run event loop, also the `await_terminal` poll interval
    pub poll_interval: Duration,
    /// Hard deadline for a dispatched run
    pub run_timeout: Duration,
    /// Capacity of the run update broadcast channel
    pub update_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            run_timeout: Duration::from_secs(300), // 5 minutes
            update_buffer: 100,
        }
    }
}

/// Request to start a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Existing input to run again or edit; `None` creates a new input
    pub input_id: Option<String>,
    pub parameters: SimulationConfig,
}

impl RunRequest {
    pub fn new(parameters: SimulationConfig) -> Self {
        Self {
            input_id: None,
            parameters,
        }
    }

    /// Re-run `input_id`, editing it if `parameters` differ from the stored ones
    pub fn for_input(input_id: &str, parameters: SimulationConfig) -> Self {
        Self {
            input_id: Some(input_id.to_string()),
            parameters,
        }
    }
}

/// Broadcast whenever a live run changes
#[derive(Debug, Clone, Serialize)]
pub struct RunUpdate {
    pub output_id: String,
    pub input_id: String,
    pub status: RunStatus,
    pub progress: f64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.run_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_run_request_json() {
        let json = serde_json::json!({
            "input_id": null,
            "parameters": {
                "country": "Vietnam",
                "time_horizon_months": 12,
                "kind": "rate",
                "tariff_rate": 3.5,
                "confidence_level": 0.95
            }
        });
        let request: RunRequest = serde_json::from_value(json).unwrap();
        assert!(request.input_id.is_none());
        assert_eq!(request.parameters, SimulationConfig::with_rate("Vietnam", 3.5));
    }
}
