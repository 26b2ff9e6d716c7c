//! tariffsim - Monte Carlo tariff-impact simulations
//!
//! Runs tariff-impact simulations through a lifecycle orchestrator backed by a
//! fingerprint-keyed result cache, and compares completed runs.
//!
//! ## Components
//!
//! - **Cache**: partitioned TTL + LRU store and the simulation result cache
//! - **Orchestrator**: run lifecycle, worker event loop, audit trail
//! - **Comparison**: difference matrices between completed runs
//! - **Worker**: compute worker interface and the local Monte Carlo worker
//! - **Store**: persistence interface and the in-memory store
//! - **Analysis**: reports derived from completed runs

pub mod analysis;
pub mod cache;
pub mod comparison;
pub mod config;
pub mod orchestrator;
pub mod simulation;
pub mod store;
pub mod types;
pub mod worker;

pub use config::Args;
pub use orchestrator::{OrchestratorConfig, RunRequest, SimulationOrchestrator};
pub use types::{Result, SimError};
