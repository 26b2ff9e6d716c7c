//! In-memory simulation store (for testing/local development)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::SimulationStore;
use crate::simulation::{
    ParameterChangeRecord, SimulationComparison, SimulationInput, SimulationOutput,
};
use crate::types::{Result, SimError};

#[derive(Default)]
pub struct InMemorySimulationStore {
    inputs: RwLock<HashMap<String, SimulationInput>>,
    outputs: RwLock<HashMap<String, SimulationOutput>>,
    changes: RwLock<Vec<ParameterChangeRecord>>,
    comparisons: RwLock<HashMap<String, SimulationComparison>>,
    /// When set, output writes fail (used to exercise degraded persistence)
    fail_output_writes: AtomicBool,
}

impl InMemorySimulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save_output` calls fail
    pub fn set_fail_output_writes(&self, fail: bool) {
        self.fail_output_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn input_count(&self) -> usize {
        self.inputs.read().await.len()
    }

    pub async fn output_count(&self) -> usize {
        self.outputs.read().await.len()
    }
}

#[async_trait::async_trait]
impl SimulationStore for InMemorySimulationStore {
    async fn save_input(&self, input: &SimulationInput) -> Result<()> {
        self.inputs
            .write()
            .await
            .insert(input.id.clone(), input.clone());
        Ok(())
    }

    async fn get_input(&self, id: &str) -> Result<Option<SimulationInput>> {
        Ok(self.inputs.read().await.get(id).cloned())
    }

    async fn save_output(&self, output: &SimulationOutput) -> Result<()> {
        if self.fail_output_writes.load(Ordering::SeqCst) {
            return Err(SimError::Persistence(format!(
                "output {} not written: store unavailable",
                output.id
            )));
        }
        self.outputs
            .write()
            .await
            .insert(output.id.clone(), output.clone());
        Ok(())
    }

    async fn get_output(&self, id: &str) -> Result<Option<SimulationOutput>> {
        Ok(self.outputs.read().await.get(id).cloned())
    }

    async fn list_outputs_by_input(&self, input_id: &str) -> Result<Vec<SimulationOutput>> {
        let mut outputs: Vec<SimulationOutput> = self
            .outputs
            .read()
            .await
            .values()
            .filter(|o| o.input_id == input_id)
            .cloned()
            .collect();
        outputs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(outputs)
    }

    async fn append_changes(&self, records: &[ParameterChangeRecord]) -> Result<()> {
        self.changes.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn list_changes(&self, simulation_id: &str) -> Result<Vec<ParameterChangeRecord>> {
        Ok(self
            .changes
            .read()
            .await
            .iter()
            .filter(|r| r.simulation_id == simulation_id)
            .cloned()
            .collect())
    }

    async fn save_comparison(&self, comparison: &SimulationComparison) -> Result<()> {
        self.comparisons
            .write()
            .await
            .insert(comparison.id.clone(), comparison.clone());
        Ok(())
    }

    async fn get_comparison(&self, id: &str) -> Result<Option<SimulationComparison>> {
        Ok(self.comparisons.read().await.get(id).cloned())
    }
}
