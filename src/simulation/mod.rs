//! Simulation domain model
//!
//! - `params` - closed parameter schema and canonicalisation helpers
//! - `model` - input/output/audit/comparison records
//! - `state` - run status state machine

pub mod model;
pub mod params;
pub mod state;

pub use model::{
    AnalysisReport, DifferenceCell, DifferenceMatrix, ParameterChangeRecord, ResultPayload,
    SimulationComparison, SimulationInput, SimulationOutput,
};
pub use params::{canonical_set, canonical_text, ParamValue, SimulationConfig, TariffMeasure};
pub use state::{RunEvent, RunStatus, Transition};
