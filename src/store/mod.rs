//! Persistence boundary for simulation records
//!
//! The orchestrator only talks to [`SimulationStore`]. [`InMemorySimulationStore`]
//! backs tests and the CLI.

pub mod memory;

pub use memory::InMemorySimulationStore;

use crate::simulation::{
    ParameterChangeRecord, SimulationComparison, SimulationInput, SimulationOutput,
};
use crate::types::Result;

/// Storage for inputs, outputs, change records, and comparisons
#[async_trait::async_trait]
pub trait SimulationStore: Send + Sync {
    /// Insert or replace an input
    async fn save_input(&self, input: &SimulationInput) -> Result<()>;

    async fn get_input(&self, id: &str) -> Result<Option<SimulationInput>>;

    /// Insert or replace an output
    async fn save_output(&self, output: &SimulationOutput) -> Result<()>;

    async fn get_output(&self, id: &str) -> Result<Option<SimulationOutput>>;

    /// Outputs of one input, oldest first
    async fn list_outputs_by_input(&self, input_id: &str) -> Result<Vec<SimulationOutput>>;

    /// Append change records; existing records are never modified
    async fn append_changes(&self, records: &[ParameterChangeRecord]) -> Result<()>;

    /// Change records for one simulation, in insertion order
    async fn list_changes(&self, simulation_id: &str) -> Result<Vec<ParameterChangeRecord>>;

    async fn save_comparison(&self, comparison: &SimulationComparison) -> Result<()>;

    async fn get_comparison(&self, id: &str) -> Result<Option<SimulationComparison>>;
}
