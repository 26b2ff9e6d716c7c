//! Simulation records
//!
//! Inputs are immutable apart from a one-time name/description. Outputs are
//! mutated in place by the orchestrator as worker events arrive. Change records
//! and comparisons are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::params::{ParamValue, SimulationConfig};
use super::state::RunStatus;

/// Raw result payload produced by a compute worker
pub type ResultPayload = serde_json::Value;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The parameters a run was started from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    pub id: String,
    pub parameters: SimulationConfig,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Input this one revises, when created by editing a job
    pub previous_input_id: Option<String>,
}

impl SimulationInput {
    pub fn new(parameters: SimulationConfig, created_by: &str) -> Self {
        Self {
            id: new_id(),
            parameters,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            name: None,
            description: None,
            previous_input_id: None,
        }
    }

    /// A new input revising `previous`
    pub fn revision_of(previous: &SimulationInput, parameters: SimulationConfig, created_by: &str) -> Self {
        Self {
            previous_input_id: Some(previous.id.clone()),
            ..Self::new(parameters, created_by)
        }
    }

    pub fn is_saved(&self) -> bool {
        self.name.is_some()
    }
}

/// Derived analysis attached to a completed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: String,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// One execution attempt of a simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub id: String,
    pub input_id: String,
    pub status: RunStatus,
    /// 0-100
    pub progress: f64,
    pub results: Option<ResultPayload>,
    pub analysis: Option<AnalysisReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Satisfied from the simulation cache without a worker dispatch
    pub from_cache: bool,
    /// Worker job this run was dispatched as
    pub job_handle: Option<String>,
}

impl SimulationOutput {
    /// A fresh output in the `idle` state
    pub fn new(input_id: &str) -> Self {
        Self {
            id: new_id(),
            input_id: input_id.to_string(),
            status: RunStatus::Idle,
            progress: 0.0,
            results: None,
            analysis: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            from_cache: false,
            job_handle: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Audit entry for one changed parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChangeRecord {
    pub id: String,
    pub simulation_id: String,
    pub parameter_id: String,
    pub old_value: ParamValue,
    pub new_value: ParamValue,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

impl ParameterChangeRecord {
    pub fn new(
        simulation_id: &str,
        parameter_id: &str,
        old_value: ParamValue,
        new_value: ParamValue,
        changed_by: &str,
    ) -> Self {
        Self {
            id: new_id(),
            simulation_id: simulation_id.to_string(),
            parameter_id: parameter_id.to_string(),
            old_value,
            new_value,
            changed_by: changed_by.to_string(),
            changed_at: Utc::now(),
        }
    }
}

/// Difference of one compared output against the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferenceCell {
    pub output_id: String,
    pub percentage_difference: f64,
    pub absolute_difference: f64,
}

impl DifferenceCell {
    pub fn is_zero(&self) -> bool {
        self.percentage_difference == 0.0 && self.absolute_difference == 0.0
    }
}

/// Per-key list of differences, one cell per non-baseline output.
///
/// The baseline has no cell of its own, so `cells[i]` belongs to
/// `output_ids[i + 1]`; match on [`DifferenceCell::output_id`] rather than
/// indexing by output position.
pub type DifferenceMatrix = BTreeMap<String, Vec<DifferenceCell>>;

/// Immutable comparison between completed runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationComparison {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Compared outputs, baseline first
    pub output_ids: Vec<String>,
    pub parameter_differences: DifferenceMatrix,
    pub result_differences: DifferenceMatrix,
    pub created_at: DateTime<Utc>,
}

impl SimulationComparison {
    pub(crate) fn new(
        name: &str,
        description: Option<String>,
        output_ids: Vec<String>,
        parameter_differences: DifferenceMatrix,
        result_differences: DifferenceMatrix,
    ) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            description,
            output_ids,
            parameter_differences,
            result_differences,
            created_at: Utc::now(),
        }
    }

    /// True when every parameter difference is zero
    pub fn parameters_identical(&self) -> bool {
        self.parameter_differences
            .values()
            .flatten()
            .all(DifferenceCell::is_zero)
    }
}
