//! Compute worker interface
//!
//! The orchestrator hands a [`JobSpec`] to a [`ComputeWorker`] and gets back a
//! job handle plus a typed event channel. Every message on the channel is
//! tagged with the handle it belongs to.
//!
//! - `pool` - in-process worker running jobs on tokio tasks
//! - `model` - Monte Carlo tariff-impact model used by the local worker

pub mod model;
pub mod pool;

pub use model::{TariffImpactModel, TariffImpactSummary};
pub use pool::{LocalComputeWorker, WorkerConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::simulation::{ResultPayload, SimulationConfig};
use crate::types::Result;

/// Work sent to a compute worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Output record the job computes
    pub output_id: String,
    /// Parameter fingerprint, also used as the model seed
    pub fingerprint: String,
    pub parameters: SimulationConfig,
}

/// Worker-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signal from a running job
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Percentage complete, 0-100
    Progress(f64),
    Complete(ResultPayload),
    Error(String),
}

/// Event tagged with the job it belongs to
#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub handle: JobHandle,
    pub event: WorkerEvent,
}

/// A dispatched job and its event stream
pub struct DispatchedJob {
    pub handle: JobHandle,
    pub events: mpsc::Receiver<WorkerMessage>,
}

/// Asynchronous compute backend
#[async_trait::async_trait]
pub trait ComputeWorker: Send + Sync {
    /// Accept a job. Fails with `SimError::WorkerUnavailable` when the worker
    /// cannot take work right now; nothing is queued in that case.
    async fn dispatch(&self, spec: JobSpec) -> Result<DispatchedJob>;
}
