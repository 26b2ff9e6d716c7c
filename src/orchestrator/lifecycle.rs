//! Run lifecycle: start, worker event loop, user commands, and reads

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{OrchestratorConfig, RunRequest, RunUpdate};
use crate::analysis::AnalysisGenerator;
use crate::cache::{fingerprint, CacheMetadata, SimulationCache};
use crate::comparison::ComparisonEngine;
use crate::simulation::{
    ParameterChangeRecord, ResultPayload, RunEvent, RunStatus, SimulationComparison,
    SimulationConfig, SimulationInput, SimulationOutput, Transition,
};
use crate::store::SimulationStore;
use crate::types::{Result, SimError};
use crate::worker::{ComputeWorker, DispatchedJob, JobSpec, WorkerEvent, WorkerMessage};

const WORKER_UNAVAILABLE: &str = "worker unavailable";
const STOPPED_BY_USER: &str = "stopped by user";

/// A run the orchestrator is tracking
struct LiveRun {
    input: SimulationInput,
    output: SimulationOutput,
}

/// What happened when an event was applied to a run
enum Outcome {
    Applied(SimulationOutput),
    /// The run had already finished; the event was dropped
    Stale(RunStatus),
}

fn update_of(output: &SimulationOutput) -> RunUpdate {
    RunUpdate {
        output_id: output.id.clone(),
        input_id: output.input_id.clone(),
        status: output.status,
        progress: output.progress,
        error: output.error.clone(),
    }
}

/// Drives simulation runs through their lifecycle
///
/// Cheap to clone; clones share the same run table, cache, and collaborators.
#[derive(Clone)]
pub struct SimulationOrchestrator {
    config: OrchestratorConfig,
    cache: Arc<SimulationCache>,
    worker: Arc<dyn ComputeWorker>,
    store: Arc<dyn SimulationStore>,
    analysis: Arc<dyn AnalysisGenerator>,
    /// Live runs by output id. A run leaves once its terminal state is
    /// persisted; runs whose output writes fail stay and are served from here.
    runs: Arc<RwLock<HashMap<String, LiveRun>>>,
    /// input id -> output id of its running or paused run
    active: Arc<DashMap<String, String>>,
    save_lock: Arc<Mutex<()>>,
    update_tx: broadcast::Sender<RunUpdate>,
}

impl SimulationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        cache: Arc<SimulationCache>,
        worker: Arc<dyn ComputeWorker>,
        store: Arc<dyn SimulationStore>,
        analysis: Arc<dyn AnalysisGenerator>,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(config.update_buffer.max(1));
        Self {
            config,
            cache,
            worker,
            store,
            analysis,
            runs: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(DashMap::new()),
            save_lock: Arc::new(Mutex::new(())),
            update_tx,
        }
    }

    /// Subscribe to run updates
    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.update_tx.subscribe()
    }

    pub fn cache(&self) -> &Arc<SimulationCache> {
        &self.cache
    }

    /// Number of runs currently running or paused
    pub fn active_run_count(&self) -> usize {
        self.active.len()
    }

    /// Start a run.
    ///
    /// Returns once the run is either finished (cache hit, worker unavailable)
    /// or dispatched; a dispatched run continues on a background task. Fails
    /// with `RunInProgress` if the input already has a running or paused run.
    pub async fn start_run(&self, request: RunRequest, actor: &str) -> Result<SimulationOutput> {
        let fingerprint = fingerprint(&request.parameters)?;
        let input = self.resolve_input(request, actor).await?;

        let mut output = SimulationOutput::new(&input.id);
        match self.active.entry(input.id.clone()) {
            Entry::Occupied(_) => return Err(SimError::RunInProgress(input.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(output.id.clone());
            }
        }
        if let Transition::To(next) = output.status.apply(RunEvent::Start) {
            output.status = next;
        }

        let output_id = output.id.clone();
        info!(
            output_id = %output_id,
            input_id = %input.id,
            actor = %actor,
            fingerprint = %fingerprint,
            "Starting simulation run"
        );

        {
            let mut runs = self.runs.write().await;
            let _ = self.update_tx.send(update_of(&output));
            let _ = self.persist_output(&output).await;
            runs.insert(
                output_id.clone(),
                LiveRun {
                    input: input.clone(),
                    output,
                },
            );
        }

        if let Some(cached) = self.cache.get_cached_results(&input.parameters) {
            info!(
                output_id = %output_id,
                fingerprint = %cached.fingerprint,
                "Cache hit, completing without dispatch"
            );
            self.complete(&output_id, cached.results, true).await?;
            return self.get_output(&output_id).await;
        }

        let spec = JobSpec {
            output_id: output_id.clone(),
            fingerprint,
            parameters: input.parameters.clone(),
        };

        match self.worker.dispatch(spec).await {
            Ok(job) => {
                debug!(output_id = %output_id, job = %job.handle, "Run dispatched");
                let handle = job.handle.to_string();
                self.update_live(&output_id, |o| o.job_handle = Some(handle))
                    .await;
                let snapshot = self.get_output(&output_id).await?;
                tokio::spawn(self.clone().drive(output_id, job));
                Ok(snapshot)
            }
            Err(SimError::WorkerUnavailable(reason)) => {
                warn!(output_id = %output_id, reason = %reason, "Worker unavailable, failing run");
                self.on_failure(&output_id, WORKER_UNAVAILABLE).await?;
                self.get_output(&output_id).await
            }
            Err(e) => {
                error!(output_id = %output_id, error = %e, "Dispatch failed");
                self.on_failure(&output_id, &e.to_string()).await?;
                self.get_output(&output_id).await
            }
        }
    }

    /// New input, existing input, or a revision of an existing input
    async fn resolve_input(&self, request: RunRequest, actor: &str) -> Result<SimulationInput> {
        let Some(input_id) = request.input_id else {
            let input = SimulationInput::new(request.parameters, actor);
            self.store.save_input(&input).await?;
            debug!(input_id = %input.id, "Created simulation input");
            return Ok(input);
        };

        let existing = self.get_input(&input_id).await?;
        if existing.parameters.is_equivalent(&request.parameters) {
            return Ok(existing);
        }

        let revised = SimulationInput::revision_of(&existing, request.parameters, actor);
        self.store.save_input(&revised).await?;
        let changes = self
            .record_parameter_changes(&existing.id, &existing.parameters, &revised.parameters, actor)
            .await?;
        info!(
            input_id = %existing.id,
            revised_input_id = %revised.id,
            changes = changes.len(),
            "Edited simulation input"
        );
        Ok(revised)
    }

    /// Consume one job's events until the run finishes, stops, or times out
    async fn drive(self, output_id: String, mut job: DispatchedJob) {
        let timeout = self.config.run_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = job.events.recv() => {
                    let Some(WorkerMessage { handle, event }) = message else {
                        self.fail_logged(&output_id, "worker disconnected before completion").await;
                        break;
                    };
                    if handle != job.handle {
                        debug!(output_id = %output_id, handle = %handle, "Ignoring event for another job");
                        continue;
                    }
                    match event {
                        WorkerEvent::Progress(pct) => {
                            if let Err(e) = self.on_progress(&output_id, pct).await {
                                warn!(output_id = %output_id, error = %e, "Progress update rejected");
                            }
                        }
                        WorkerEvent::Complete(results) => {
                            if let Err(e) = self.on_completion(&output_id, results).await {
                                error!(output_id = %output_id, error = %e, "Completion handling failed");
                            }
                            break;
                        }
                        WorkerEvent::Error(message) => {
                            self.fail_logged(&output_id, &message).await;
                            break;
                        }
                    }
                }
                _ = &mut deadline => {
                    warn!(output_id = %output_id, timeout_secs = timeout.as_secs(), "Run deadline passed");
                    self.fail_logged(&output_id, &SimError::Timeout(timeout).to_string()).await;
                    break;
                }
                _ = tick.tick() => {
                    if !self.is_active(&output_id).await {
                        debug!(output_id = %output_id, "Run no longer active, leaving event loop");
                        break;
                    }
                }
            }
        }
    }

    /// Record progress. Status never changes; ignored once the run is terminal.
    pub async fn on_progress(&self, output_id: &str, pct: f64) -> Result<()> {
        let pct = if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) };

        match self
            .transition(output_id, RunEvent::Progress(pct), |o| o.progress = pct)
            .await?
        {
            Outcome::Applied(_) => debug!(output_id = %output_id, progress = pct, "Run progress"),
            Outcome::Stale(status) => {
                debug!(output_id = %output_id, status = %status, "Ignoring progress for finished run")
            }
        }
        Ok(())
    }

    /// Record results, complete the run, cache the results, and attach analysis
    pub async fn on_completion(&self, output_id: &str, results: ResultPayload) -> Result<()> {
        self.complete(output_id, results, false).await.map(|_| ())
    }

    async fn complete(
        &self,
        output_id: &str,
        results: ResultPayload,
        from_cache: bool,
    ) -> Result<Outcome> {
        let live = self
            .runs
            .read()
            .await
            .get(output_id)
            .map(|run| (run.input.clone(), run.output.clone()));
        let Some((input, mut draft)) = live else {
            let status = self.retired_status(output_id).await?;
            debug!(output_id = %output_id, status = %status, "Ignoring completion for finished run");
            return Ok(Outcome::Stale(status));
        };
        if draft.is_terminal() {
            debug!(output_id = %output_id, status = %draft.status, "Ignoring completion for finished run");
            return Ok(Outcome::Stale(draft.status));
        }

        draft.results = Some(results.clone());
        let analysis = match self.analysis.generate(&input, &draft).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(output_id = %output_id, error = %e, "Analysis generation failed");
                None
            }
        };

        // The cache write shares the run's critical section, so a run observed
        // as completed always has its results cached
        let cache = &self.cache;
        let params = &input.parameters;
        let outcome = self
            .transition(output_id, RunEvent::Complete, move |o| {
                if !from_cache
                    && !cache.cache_results(params, results.clone(), CacheMetadata::new("worker"))
                {
                    warn!(output_id = %o.id, "Results not cached");
                }
                o.results = Some(results);
                o.analysis = analysis;
                o.progress = 100.0;
                o.completed_at = Some(Utc::now());
                o.from_cache = from_cache;
            })
            .await?;

        match &outcome {
            Outcome::Applied(_) => {
                info!(output_id = %output_id, from_cache, "Simulation run completed");
            }
            Outcome::Stale(status) => {
                debug!(output_id = %output_id, status = %status, "Run finished while completing")
            }
        }
        Ok(outcome)
    }

    /// Fail the run with `message`. No retry is attempted.
    pub async fn on_failure(&self, output_id: &str, message: &str) -> Result<()> {
        let error = message.to_string();
        match self
            .transition(output_id, RunEvent::Fail, move |o| {
                o.error = Some(error);
                o.completed_at = Some(Utc::now());
            })
            .await?
        {
            Outcome::Applied(_) => {
                warn!(output_id = %output_id, error = %message, "Simulation run failed")
            }
            Outcome::Stale(status) => {
                debug!(output_id = %output_id, status = %status, "Ignoring failure for finished run")
            }
        }
        Ok(())
    }

    async fn fail_logged(&self, output_id: &str, message: &str) {
        if let Err(e) = self.on_failure(output_id, message).await {
            error!(output_id = %output_id, error = %e, "Could not fail run");
        }
    }

    pub async fn pause(&self, output_id: &str) -> Result<SimulationOutput> {
        let output = self.command(output_id, RunEvent::Pause, "paused", None).await?;
        info!(output_id = %output_id, "Run paused");
        Ok(output)
    }

    pub async fn resume(&self, output_id: &str) -> Result<SimulationOutput> {
        let output = self.command(output_id, RunEvent::Resume, "running", None).await?;
        info!(output_id = %output_id, "Run resumed");
        Ok(output)
    }

    /// Abandon a run. The worker is not told; its later events are dropped.
    pub async fn stop(&self, output_id: &str) -> Result<SimulationOutput> {
        let output = self
            .command(output_id, RunEvent::Fail, "stopped", Some(STOPPED_BY_USER))
            .await?;
        info!(output_id = %output_id, "Run stopped by user");
        Ok(output)
    }

    /// A user command: stale outcomes are errors rather than no-ops
    async fn command(
        &self,
        output_id: &str,
        event: RunEvent,
        target: &str,
        error: Option<&str>,
    ) -> Result<SimulationOutput> {
        let error = error.map(str::to_string);
        let outcome = self
            .transition(output_id, event, move |o| {
                if let Some(error) = error {
                    o.error = Some(error);
                    o.completed_at = Some(Utc::now());
                }
            })
            .await?;

        match outcome {
            Outcome::Applied(output) => Ok(output),
            Outcome::Stale(status) => Err(SimError::InvalidTransition {
                from: status.to_string(),
                to: target.to_string(),
            }),
        }
    }

    /// Apply `event` to a live run and, if accepted, let `update` edit it.
    ///
    /// The edit, the active-run release, the broadcast, the store write and
    /// the retirement of a finished run all happen under the run table lock,
    /// so writes reach the store in order and a run never leaves the table
    /// before its terminal state is readable from the store.
    async fn transition<F>(&self, output_id: &str, event: RunEvent, update: F) -> Result<Outcome>
    where
        F: FnOnce(&mut SimulationOutput) + Send,
    {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(output_id) else {
            return Ok(Outcome::Stale(self.retired_status(output_id).await?));
        };
        let output = &mut run.output;

        match output.status.apply(event) {
            Transition::To(next) => output.status = next,
            Transition::Stay => {}
            Transition::Ignore => return Ok(Outcome::Stale(output.status)),
            Transition::Invalid => {
                return Err(SimError::InvalidTransition {
                    from: output.status.to_string(),
                    to: event.to_string(),
                })
            }
        }
        update(output);
        let snapshot = output.clone();

        if snapshot.is_terminal() {
            self.active
                .remove_if(&snapshot.input_id, |_, current| *current == snapshot.id);
        }
        let _ = self.update_tx.send(update_of(&snapshot));
        let persisted = self.persist_output(&snapshot).await;
        if snapshot.is_terminal() && persisted {
            runs.remove(output_id);
            debug!(output_id = %output_id, "Retired finished run from live table");
        }
        Ok(Outcome::Applied(snapshot))
    }

    /// Status of a run that is no longer live. Only finished, persisted runs
    /// leave the table, so anything else is unknown here.
    async fn retired_status(&self, output_id: &str) -> Result<RunStatus> {
        match self.store.get_output(output_id).await? {
            Some(output) if output.is_terminal() => Ok(output.status),
            _ => Err(SimError::NotFound(format!("live run {}", output_id))),
        }
    }

    /// Edit a live run without a status change
    async fn update_live<F>(&self, output_id: &str, update: F)
    where
        F: FnOnce(&mut SimulationOutput) + Send,
    {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(output_id) {
            update(&mut run.output);
            let _ = self.persist_output(&run.output).await;
        }
    }

    /// Output writes are best effort: the live table keeps the latest state
    async fn persist_output(&self, output: &SimulationOutput) -> bool {
        match self.store.save_output(output).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    output_id = %output.id,
                    status = %output.status,
                    error = %e,
                    "Failed to persist output, serving from live run table"
                );
                false
            }
        }
    }

    async fn is_active(&self, output_id: &str) -> bool {
        self.runs
            .read()
            .await
            .get(output_id)
            .map(|run| run.output.status.is_active())
            .unwrap_or(false)
    }

    /// Set a simulation's name and description. Allowed once per input.
    pub async fn save_simulation(
        &self,
        input_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<SimulationInput> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SimError::Config("simulation name must not be empty".into()));
        }

        let _guard = self.save_lock.lock().await;
        let mut input = self.get_input(input_id).await?;
        if input.is_saved() {
            return Err(SimError::AlreadySaved(input_id.to_string()));
        }
        input.name = Some(name.to_string());
        input.description = description;
        self.store.save_input(&input).await?;

        info!(input_id = %input_id, name = %name, "Saved simulation");
        Ok(input)
    }

    /// Append one change record per parameter present in both configs whose
    /// value differs
    pub async fn record_parameter_changes(
        &self,
        simulation_id: &str,
        old: &SimulationConfig,
        new: &SimulationConfig,
        actor: &str,
    ) -> Result<Vec<ParameterChangeRecord>> {
        let after = new.parameters();
        let records: Vec<ParameterChangeRecord> = old
            .parameters()
            .into_iter()
            .filter_map(|(key, old_value)| {
                let new_value = after.get(key)?;
                (old_value != *new_value).then(|| {
                    ParameterChangeRecord::new(
                        simulation_id,
                        key,
                        old_value,
                        new_value.clone(),
                        actor,
                    )
                })
            })
            .collect();

        if !records.is_empty() {
            self.store.append_changes(&records).await?;
            debug!(simulation_id = %simulation_id, count = records.len(), "Recorded parameter changes");
        }
        Ok(records)
    }

    pub async fn list_parameter_changes(
        &self,
        simulation_id: &str,
    ) -> Result<Vec<ParameterChangeRecord>> {
        self.store.list_changes(simulation_id).await
    }

    /// Latest state of an output: the live table first, then the store
    pub async fn get_output(&self, output_id: &str) -> Result<SimulationOutput> {
        if let Some(run) = self.runs.read().await.get(output_id) {
            return Ok(run.output.clone());
        }
        self.store
            .get_output(output_id)
            .await?
            .ok_or_else(|| SimError::NotFound(format!("output {}", output_id)))
    }

    pub async fn get_input(&self, input_id: &str) -> Result<SimulationInput> {
        self.store
            .get_input(input_id)
            .await?
            .ok_or_else(|| SimError::NotFound(format!("input {}", input_id)))
    }

    /// All outputs of one input, oldest first
    pub async fn list_outputs(&self, input_id: &str) -> Result<Vec<SimulationOutput>> {
        let stored = match self.store.list_outputs_by_input(input_id).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(input_id = %input_id, error = %e, "Listing stored outputs failed");
                Vec::new()
            }
        };

        let mut merged: HashMap<String, SimulationOutput> =
            stored.into_iter().map(|o| (o.id.clone(), o)).collect();
        for run in self.runs.read().await.values() {
            if run.output.input_id == input_id {
                merged.insert(run.output.id.clone(), run.output.clone());
            }
        }

        let mut outputs: Vec<SimulationOutput> = merged.into_values().collect();
        outputs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(outputs)
    }

    /// Wait until an output reaches a terminal status.
    ///
    /// Every dispatched run has a deadline, so this returns for any run this
    /// orchestrator owns. Outputs it does not own are returned as stored.
    pub async fn await_terminal(&self, output_id: &str) -> Result<SimulationOutput> {
        loop {
            let output = self.get_output(output_id).await?;
            let live = self.runs.read().await.contains_key(output_id);
            if output.is_terminal() || !live {
                return Ok(output);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Compare completed outputs (baseline first) and persist the comparison
    pub async fn compare(
        &self,
        output_ids: &[String],
        name: &str,
        description: Option<String>,
    ) -> Result<SimulationComparison> {
        let mut runs = Vec::with_capacity(output_ids.len());
        for output_id in output_ids {
            let output = self.get_output(output_id).await?;
            let input = self.get_input(&output.input_id).await?;
            runs.push((input, output));
        }

        let comparison = ComparisonEngine::compare(&runs, name, description)?;
        self.store.save_comparison(&comparison).await?;

        info!(
            comparison_id = %comparison.id,
            outputs = output_ids.len(),
            "Created comparison"
        );
        Ok(comparison)
    }

    pub async fn get_comparison(&self, comparison_id: &str) -> Result<SimulationComparison> {
        self.store
            .get_comparison(comparison_id)
            .await?
            .ok_or_else(|| SimError::NotFound(format!("comparison {}", comparison_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SummaryAnalysisGenerator;
    use crate::cache::CacheConfig;
    use crate::simulation::ParamValue;
    use crate::store::InMemorySimulationStore;
    use crate::worker::JobHandle;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Worker that replays a fixed script of events
    #[derive(Default)]
    struct ScriptedWorker {
        script: Vec<WorkerEvent>,
        /// Sent first, tagged with a handle of some other job
        foreign: Vec<WorkerEvent>,
        /// Keep the channel open after the script (never finishes on its own)
        hold_open: bool,
        unavailable: bool,
        calls: AtomicUsize,
        senders: std::sync::Mutex<Vec<mpsc::Sender<WorkerMessage>>>,
    }

    impl ScriptedWorker {
        fn completing(results: serde_json::Value) -> Self {
            Self {
                script: vec![
                    WorkerEvent::Progress(50.0),
                    WorkerEvent::Complete(results),
                ],
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            Self {
                script: vec![WorkerEvent::Progress(10.0)],
                hold_open: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ComputeWorker for ScriptedWorker {
        async fn dispatch(&self, _spec: JobSpec) -> Result<DispatchedJob> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(SimError::WorkerUnavailable("no capacity".into()));
            }

            let handle = JobHandle(format!("job-{}", n));
            let (tx, rx) = mpsc::channel(16);
            for event in &self.foreign {
                let _ = tx.try_send(WorkerMessage {
                    handle: JobHandle("other-job".into()),
                    event: event.clone(),
                });
            }
            for event in &self.script {
                let _ = tx.try_send(WorkerMessage {
                    handle: handle.clone(),
                    event: event.clone(),
                });
            }
            if self.hold_open {
                self.senders.lock().unwrap().push(tx);
            }
            Ok(DispatchedJob { handle, events: rx })
        }
    }

    fn results(mean: f64) -> serde_json::Value {
        json!({
            "iterations": 100,
            "mean_price_impact_pct": mean,
            "lower_bound_pct": mean - 1.0,
            "upper_bound_pct": mean + 1.0,
        })
    }

    fn harness(
        worker: ScriptedWorker,
    ) -> (
        SimulationOrchestrator,
        Arc<ScriptedWorker>,
        Arc<InMemorySimulationStore>,
    ) {
        let worker = Arc::new(worker);
        let store = Arc::new(InMemorySimulationStore::new());
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(10),
            run_timeout: Duration::from_secs(5),
            update_buffer: 64,
        };
        let orchestrator = SimulationOrchestrator::new(
            config,
            Arc::new(SimulationCache::new(CacheConfig::default())),
            worker.clone(),
            store.clone(),
            Arc::new(SummaryAnalysisGenerator::new()),
        );
        (orchestrator, worker, store)
    }

    fn vietnam(rate: f64) -> SimulationConfig {
        SimulationConfig::with_rate("Vietnam", rate)
    }

    #[tokio::test]
    async fn test_cache_hit_completes_without_worker() {
        let (orchestrator, worker, _) = harness(ScriptedWorker::completing(results(1.0)));
        let cached = results(4.2);
        assert!(orchestrator.cache().cache_results(
            &vietnam(3.5),
            cached.clone(),
            CacheMetadata::new("test")
        ));

        let output = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Completed);
        assert!(output.from_cache);
        assert_eq!(output.results, Some(cached));
        assert!(output.analysis.is_some());
        assert_eq!(worker.calls(), 0);
        assert_eq!(orchestrator.active_run_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatched_run_completes_and_caches() {
        let (orchestrator, worker, store) = harness(ScriptedWorker::completing(results(2.0)));

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        assert_eq!(started.status, RunStatus::Running);
        assert_eq!(started.job_handle.as_deref(), Some("job-0"));

        let done = orchestrator.await_terminal(&started.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.progress, 100.0);
        assert!(!done.from_cache);
        assert!(done.analysis.is_some());
        assert!(done.completed_at.is_some());
        assert_eq!(store.get_output(&done.id).await.unwrap(), Some(done.clone()));
        assert!(orchestrator.cache().contains(&vietnam(3.5)));

        // Same parameters again: served from the cache
        let again = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "bob")
            .await
            .unwrap();
        assert!(again.from_cache);
        assert_eq!(again.results, done.results);
        assert_eq!(worker.calls(), 1);
    }

    #[tokio::test]
    async fn test_worker_unavailable_fails_run() {
        let (orchestrator, worker, _) = harness(ScriptedWorker {
            unavailable: true,
            ..Default::default()
        });

        let output = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.error.as_deref(), Some("worker unavailable"));
        assert_eq!(orchestrator.active_run_count(), 0);

        // Nothing was queued, and the input is free for another attempt
        let retry = orchestrator
            .start_run(RunRequest::for_input(&output.input_id, vietnam(3.5)), "alice")
            .await
            .unwrap();
        assert_eq!(retry.status, RunStatus::Failed);
        assert_eq!(worker.calls(), 2);
    }

    #[tokio::test]
    async fn test_worker_error_fails_run_without_caching() {
        let (orchestrator, _, _) = harness(ScriptedWorker {
            script: vec![
                WorkerEvent::Progress(30.0),
                WorkerEvent::Error("model diverged".into()),
            ],
            ..Default::default()
        });

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let done = orchestrator.await_terminal(&started.id).await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("model diverged"));
        assert!(done.results.is_none());
        assert!(!orchestrator.cache().contains(&vietnam(3.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let (orchestrator, _, _) = harness(ScriptedWorker::hanging());

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let done = orchestrator.await_terminal(&started.id).await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("Simulation timed out after 5s"));
        assert_eq!(orchestrator.active_run_count(), 0);
    }

    #[tokio::test]
    async fn test_one_active_run_per_input() {
        let (orchestrator, _, _) = harness(ScriptedWorker::hanging());

        let first = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let second = orchestrator
            .start_run(RunRequest::for_input(&first.input_id, vietnam(3.5)), "alice")
            .await;
        assert!(matches!(second, Err(SimError::RunInProgress(_))));

        let stopped = orchestrator.stop(&first.id).await.unwrap();
        assert_eq!(stopped.status, RunStatus::Failed);
        assert_eq!(stopped.error.as_deref(), Some("stopped by user"));

        let third = orchestrator
            .start_run(RunRequest::for_input(&first.input_id, vietnam(3.5)), "alice")
            .await
            .unwrap();
        assert_eq!(third.status, RunStatus::Running);
        assert_eq!(orchestrator.list_outputs(&first.input_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_signals_after_completion_are_ignored() {
        let (orchestrator, _, _) = harness(ScriptedWorker::completing(results(2.0)));

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let done = orchestrator.await_terminal(&started.id).await.unwrap();

        orchestrator.on_progress(&done.id, 10.0).await.unwrap();
        orchestrator.on_failure(&done.id, "late").await.unwrap();
        orchestrator.on_completion(&done.id, results(9.0)).await.unwrap();

        let after = orchestrator.get_output(&done.id).await.unwrap();
        assert_eq!(after, done);
    }

    #[tokio::test]
    async fn test_pause_resume_stop() {
        let (orchestrator, _, _) = harness(ScriptedWorker::hanging());
        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();

        let paused = orchestrator.pause(&started.id).await.unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        assert!(orchestrator.pause(&started.id).await.is_err());

        // Progress while paused moves the bar, not the status
        orchestrator.on_progress(&started.id, 40.0).await.unwrap();
        let current = orchestrator.get_output(&started.id).await.unwrap();
        assert_eq!(current.status, RunStatus::Paused);
        assert_eq!(current.progress, 40.0);

        let resumed = orchestrator.resume(&started.id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Running);

        orchestrator.stop(&started.id).await.unwrap();
        assert!(matches!(
            orchestrator.resume(&started.id).await,
            Err(SimError::InvalidTransition { .. })
        ));
        assert!(matches!(
            orchestrator.stop(&started.id).await,
            Err(SimError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let (orchestrator, _, _) = harness(ScriptedWorker::hanging());
        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();

        orchestrator.on_progress(&started.id, 250.0).await.unwrap();
        assert_eq!(orchestrator.get_output(&started.id).await.unwrap().progress, 100.0);
        orchestrator.on_progress(&started.id, -5.0).await.unwrap();
        assert_eq!(orchestrator.get_output(&started.id).await.unwrap().progress, 0.0);
    }

    #[tokio::test]
    async fn test_foreign_events_are_ignored() {
        let (orchestrator, _, _) = harness(ScriptedWorker {
            foreign: vec![WorkerEvent::Error("not yours".into())],
            ..ScriptedWorker::completing(results(2.0))
        });

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let done = orchestrator.await_terminal(&started.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_editing_creates_revision_and_change_records() {
        let (orchestrator, _, _) = harness(ScriptedWorker::completing(results(2.0)));

        let first = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        orchestrator.await_terminal(&first.id).await.unwrap();

        let edited = orchestrator
            .start_run(RunRequest::for_input(&first.input_id, vietnam(5.0)), "bob")
            .await
            .unwrap();
        assert_ne!(edited.input_id, first.input_id);

        let revised = orchestrator.get_input(&edited.input_id).await.unwrap();
        assert_eq!(revised.previous_input_id.as_deref(), Some(first.input_id.as_str()));
        assert_eq!(revised.created_by, "bob");

        let changes = orchestrator
            .list_parameter_changes(&first.input_id)
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].parameter_id, "tariff_rate");
        assert_eq!(changes[0].old_value, ParamValue::Number(3.5));
        assert_eq!(changes[0].new_value, ParamValue::Number(5.0));
        assert_eq!(changes[0].changed_by, "bob");
    }

    #[tokio::test]
    async fn test_record_parameter_changes_only_differences() {
        let (orchestrator, _, _) = harness(ScriptedWorker::default());
        let old = vietnam(3.5);
        let mut new = vietnam(3.5);
        new.time_horizon_months = 24;
        new.product_categories = vec!["steel".into()];

        let records = orchestrator
            .record_parameter_changes("sim-1", &old, &new, "alice")
            .await
            .unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.parameter_id.as_str()).collect();
        assert_eq!(ids, vec!["product_categories", "time_horizon_months"]);

        let none = orchestrator
            .record_parameter_changes("sim-2", &old, &old, "alice")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_save_simulation_once() {
        let (orchestrator, _, _) = harness(ScriptedWorker::completing(results(2.0)));
        let output = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();

        let saved = orchestrator
            .save_simulation(&output.input_id, "Vietnam baseline", Some("3.5%".into()))
            .await
            .unwrap();
        assert_eq!(saved.name.as_deref(), Some("Vietnam baseline"));

        assert!(matches!(
            orchestrator
                .save_simulation(&output.input_id, "Renamed", None)
                .await,
            Err(SimError::AlreadySaved(_))
        ));
        assert!(orchestrator.save_simulation("missing", "x", None).await.is_err());
    }

    #[tokio::test]
    async fn test_output_write_failures_are_downgraded() {
        let (orchestrator, _, store) = harness(ScriptedWorker::completing(results(2.0)));
        store.set_fail_output_writes(true);

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        let done = orchestrator.await_terminal(&started.id).await.unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(store.output_count().await, 0);
        assert_eq!(orchestrator.runs.read().await.len(), 1);
        assert_eq!(orchestrator.list_outputs(&done.input_id).await.unwrap(), vec![done]);
    }

    #[tokio::test]
    async fn test_finished_runs_leave_live_table() {
        let (orchestrator, _, store) = harness(ScriptedWorker::completing(results(2.0)));

        let mut finished = Vec::new();
        for rate in 1..=20 {
            let started = orchestrator
                .start_run(RunRequest::new(vietnam(f64::from(rate))), "alice")
                .await
                .unwrap();
            finished.push(orchestrator.await_terminal(&started.id).await.unwrap());
        }
        // Cache hit
        let cached = orchestrator
            .start_run(RunRequest::new(vietnam(1.0)), "alice")
            .await
            .unwrap();
        assert!(cached.from_cache);
        finished.push(cached);

        assert_eq!(orchestrator.runs.read().await.len(), 0);
        assert_eq!(orchestrator.active_run_count(), 0);
        assert_eq!(store.output_count().await, finished.len());

        for output in &finished {
            assert_eq!(output.status, RunStatus::Completed);
            assert_eq!(&orchestrator.get_output(&output.id).await.unwrap(), output);
        }
    }

    #[tokio::test]
    async fn test_stopped_runs_leave_live_table() {
        let (orchestrator, _, _) = harness(ScriptedWorker::hanging());
        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        assert_eq!(orchestrator.runs.read().await.len(), 1);

        orchestrator.stop(&started.id).await.unwrap();
        assert_eq!(orchestrator.runs.read().await.len(), 0);

        // Late worker signals for a retired run are still ignored
        orchestrator.on_progress(&started.id, 90.0).await.unwrap();
        orchestrator.on_completion(&started.id, results(1.0)).await.unwrap();
        let stopped = orchestrator.get_output(&started.id).await.unwrap();
        assert_eq!(stopped.status, RunStatus::Failed);
        assert_eq!(stopped.error.as_deref(), Some("stopped by user"));

        assert!(matches!(
            orchestrator.pause("no-such-output").await,
            Err(SimError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_persists_comparison() {
        let (orchestrator, _, _) = harness(ScriptedWorker::completing(results(2.0)));

        let mut ids = Vec::new();
        for rate in [3.5, 5.0] {
            let output = orchestrator
                .start_run(RunRequest::new(vietnam(rate)), "alice")
                .await
                .unwrap();
            ids.push(orchestrator.await_terminal(&output.id).await.unwrap().id);
        }

        let comparison = orchestrator.compare(&ids, "rates", None).await.unwrap();
        assert_eq!(comparison.output_ids, ids);
        assert!(!comparison.parameter_differences["tariff_rate"][0].is_zero());
        assert!(comparison.parameter_differences["country"][0].is_zero());
        assert_eq!(
            orchestrator.get_comparison(&comparison.id).await.unwrap(),
            comparison
        );
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let (orchestrator, _, _) = harness(ScriptedWorker::completing(results(2.0)));
        let mut updates = orchestrator.subscribe();

        let started = orchestrator
            .start_run(RunRequest::new(vietnam(3.5)), "alice")
            .await
            .unwrap();
        orchestrator.await_terminal(&started.id).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(update) = updates.try_recv() {
            assert_eq!(update.output_id, started.id);
            statuses.push(update.status);
        }
        assert_eq!(statuses.first(), Some(&RunStatus::Running));
        assert_eq!(statuses.last(), Some(&RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected_before_any_run() {
        let (orchestrator, worker, store) = harness(ScriptedWorker::default());
        let mut config = vietnam(3.5);
        config.confidence_level = 2.0;

        assert!(matches!(
            orchestrator.start_run(RunRequest::new(config), "alice").await,
            Err(SimError::Config(_))
        ));
        assert_eq!(worker.calls(), 0);
        assert_eq!(store.input_count().await, 0);
    }
}
