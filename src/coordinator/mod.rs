//! Owns every component and routes data between them.
//!
//! Poll tasks and analyze requests run on spawned tasks and report back over
//! channels; the owner loops on [`Coordinator::next_event`] and feeds each
//! event to [`Coordinator::handle_event`], so all state changes happen on
//! the owner's task.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::future::{try_join, try_join4};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::Config;
use crate::connectivity::ConnectivityTracker;
use crate::diagnosis::{
    AnalysisReply, ContextChange, DiagnosisSession, ProviderConfig, Resolution, SubmitOutcome,
};
use crate::error::{BackendError, OpsError};
use crate::handoff::{Handoff, HandoffBroker, HandoffOrigin};
use crate::models::{
    AlgorithmInfo, AnomalyEvent, AnomalyStatus, LineStatus, MetricsHistory, MlAnalysisRequest,
    MlAnalysisResult, ParetoEntry, SignalPoint, SignalStats,
};
use crate::ops::{ClearOutcome, Confirm, DataManagementOps, ExportReport};
use crate::scheduler::PollingScheduler;

/// Periodic fetch cycles. Also the connectivity domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollTask {
    /// `/api/status`, always running.
    LineStatus,
    /// `/api/metrics` + `/api/pareto`.
    Foundation,
    /// Stream, events, detector status and stats.
    AnomalyFeed,
}

impl fmt::Display for PollTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTask::LineStatus => write!(f, "line status"),
            PollTask::Foundation => write!(f, "foundation metrics"),
            PollTask::AnomalyFeed => write!(f, "anomaly feed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Foundation,
    Anomaly,
    Diagnosis,
}

impl View {
    /// Tasks this view needs besides the line status.
    fn tasks(self) -> &'static [PollTask] {
        match self {
            View::Foundation => &[PollTask::Foundation],
            View::Anomaly | View::Diagnosis => &[PollTask::AnomalyFeed],
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Foundation => write!(f, "foundation"),
            View::Anomaly => write!(f, "anomaly"),
            View::Diagnosis => write!(f, "diagnosis"),
        }
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foundation" | "line" => Ok(View::Foundation),
            "anomaly" | "anomalies" => Ok(View::Anomaly),
            "diagnosis" | "chat" => Ok(View::Diagnosis),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FoundationData {
    pub metrics: MetricsHistory,
    pub pareto: Vec<ParetoEntry>,
}

#[derive(Debug, Clone)]
pub struct AnomalyFeed {
    pub points: Vec<SignalPoint>,
    /// Newest first, as served.
    pub events: Vec<AnomalyEvent>,
    pub status: AnomalyStatus,
    pub stats: SignalStats,
}

#[derive(Debug, Clone)]
pub enum PollData {
    LineStatus(LineStatus),
    Foundation(FoundationData),
    AnomalyFeed(AnomalyFeed),
}

/// A poll result stored wholesale with its arrival time.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub data: T,
    pub received_at: DateTime<Local>,
}

impl<T> Snapshot<T> {
    fn now(data: T) -> Self {
        Self {
            data,
            received_at: Local::now(),
        }
    }
}

#[derive(Debug)]
pub enum CoordinatorEvent {
    Poll {
        task: PollTask,
        generation: u64,
        result: Result<PollData, BackendError>,
    },
    Analysis(AnalysisReply),
}

/// What [`Coordinator::handle_event`] changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Polled {
        task: PollTask,
        /// The domain just flipped to connected, first success included.
        reconnected: bool,
        /// The newest anomaly was bound as fallback context.
        fallback_bound: bool,
    },
    PollFailed {
        task: PollTask,
        disconnected: bool,
        error: String,
    },
    /// Result of a stopped or superseded task run.
    Stale { task: PollTask },
    Analysis(Resolution),
}

pub struct Coordinator {
    backend: Arc<dyn Backend>,
    scheduler: PollingScheduler<PollTask>,
    generations: HashMap<PollTask, u64>,
    next_generation: u64,
    connectivity: ConnectivityTracker<PollTask>,
    broker: HandoffBroker,
    session: DiagnosisSession,
    ops: DataManagementOps,
    view: View,
    started: bool,
    fallback_pending: bool,

    status_interval: Duration,
    foundation_interval: Duration,
    anomaly_interval: Duration,
    poll_timeout: Duration,
    stream_limit: usize,

    line_status: Option<Snapshot<LineStatus>>,
    foundation: Option<Snapshot<FoundationData>>,
    feed: Option<Snapshot<AnomalyFeed>>,

    poll_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    poll_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    reply_rx: mpsc::UnboundedReceiver<AnalysisReply>,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let session = DiagnosisSession::new(
            Arc::clone(&backend),
            reply_tx,
            config.provider.clone(),
            config.analyze_timeout(),
        );
        let ops = DataManagementOps::new(Arc::clone(&backend), config.export_dir.clone());

        Self {
            backend,
            scheduler: PollingScheduler::new(),
            generations: HashMap::new(),
            next_generation: 1,
            connectivity: ConnectivityTracker::new(),
            broker: HandoffBroker::new(),
            session,
            ops,
            view: View::Foundation,
            started: false,
            fallback_pending: false,
            status_interval: config.status_interval(),
            foundation_interval: config.foundation_interval(),
            anomaly_interval: config.anomaly_interval(),
            poll_timeout: config.poll_timeout(),
            stream_limit: config.stream_limit,
            line_status: None,
            foundation: None,
            feed: None,
            poll_tx,
            poll_rx,
            reply_rx,
        }
    }

    /// Start the line status task and the current view's tasks.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.start_task(PollTask::LineStatus);
        for task in self.view.tasks() {
            self.start_task(*task);
        }
        info!(view = %self.view, "coordinator started");
    }

    pub fn shutdown(&mut self) {
        self.scheduler.stop_all();
        self.generations.clear();
        self.started = false;
        info!("coordinator stopped");
    }

    // ── Views ────────────────────────────────────────────────────

    /// Switch views. Tasks the new view does not need are stopped, missing
    /// ones start from an immediate tick. Entering the diagnosis view
    /// resolves the pending handoff.
    pub fn activate(&mut self, view: View) -> Option<ContextChange> {
        let previous = self.view;
        self.view = view;

        if self.started {
            for task in previous.tasks() {
                if !view.tasks().contains(task) {
                    self.stop_task(*task);
                }
            }
            for task in view.tasks() {
                if !self.scheduler.is_running(task) {
                    self.start_task(*task);
                }
            }
        }
        if previous != view {
            info!(from = %previous, to = %view, "view activated");
        }

        if view == View::Diagnosis {
            self.resolve_handoff()
        } else {
            self.fallback_pending = false;
            None
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    // ── Handoff ──────────────────────────────────────────────────

    /// Operator selected `event` for diagnosis.
    pub fn select_event(&mut self, event: AnomalyEvent) -> Option<ContextChange> {
        let activation = self.broker.select(event);
        debug!(identity = %activation.target.identity(), "anomaly selected");
        self.activate(View::Diagnosis)
    }

    /// Event for the anomalous stream point `index` on `signal`'s history.
    pub fn point_event(&self, index: usize, signal: &str) -> Option<AnomalyEvent> {
        self.points().get(index)?.to_event(signal)
    }

    fn resolve_handoff(&mut self) -> Option<ContextChange> {
        match self.broker.consume(self.events()) {
            Some(Handoff {
                event,
                origin: HandoffOrigin::Explicit,
            }) => {
                self.fallback_pending = false;
                Some(self.session.set_context(event))
            }
            Some(Handoff {
                event,
                origin: HandoffOrigin::Fallback,
            }) => {
                self.fallback_pending = false;
                self.session.bind_fallback(event);
                None
            }
            None => {
                if self.session.context().is_none() && !self.session.is_awaiting() {
                    self.fallback_pending = true;
                    self.scheduler.poll_now(&PollTask::AnomalyFeed);
                }
                None
            }
        }
    }

    /// Retry a fallback that found no events, without polling again.
    fn retry_fallback(&mut self) -> bool {
        if !self.fallback_pending || self.view != View::Diagnosis {
            return false;
        }
        let Some(handoff) = self.broker.consume(self.events()) else {
            return false;
        };
        self.fallback_pending = false;
        handoff.origin == HandoffOrigin::Fallback && self.session.bind_fallback(handoff.event)
    }

    // ── Event loop ───────────────────────────────────────────────

    pub async fn next_event(&mut self) -> Option<CoordinatorEvent> {
        tokio::select! {
            Some(event) = self.poll_rx.recv() => Some(event),
            Some(reply) = self.reply_rx.recv() => Some(CoordinatorEvent::Analysis(reply)),
            else => None,
        }
    }

    pub fn handle_event(&mut self, event: CoordinatorEvent) -> Update {
        match event {
            CoordinatorEvent::Poll {
                task,
                generation,
                result,
            } => self.apply_poll(task, generation, result),
            CoordinatorEvent::Analysis(reply) => Update::Analysis(self.session.resolve(reply)),
        }
    }

    fn apply_poll(
        &mut self,
        task: PollTask,
        generation: u64,
        result: Result<PollData, BackendError>,
    ) -> Update {
        if self.generations.get(&task) != Some(&generation) {
            debug!(task = ?task, generation, "discarding poll result from stopped task");
            return Update::Stale { task };
        }

        match result {
            Ok(data) => {
                let reconnected = self.connectivity.record_success(task);
                let mut fallback_bound = false;
                match data {
                    PollData::LineStatus(status) => self.line_status = Some(Snapshot::now(status)),
                    PollData::Foundation(data) => self.foundation = Some(Snapshot::now(data)),
                    PollData::AnomalyFeed(feed) => {
                        self.feed = Some(Snapshot::now(feed));
                        fallback_bound = self.retry_fallback();
                    }
                }
                Update::Polled {
                    task,
                    reconnected,
                    fallback_bound,
                }
            }
            Err(err) => Update::PollFailed {
                task,
                disconnected: self.connectivity.record_failure(task, &err),
                error: err.to_string(),
            },
        }
    }

    fn start_task(&mut self, task: PollTask) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.generations.insert(task, generation);

        let interval = match task {
            PollTask::LineStatus => self.status_interval,
            PollTask::Foundation => self.foundation_interval,
            PollTask::AnomalyFeed => self.anomaly_interval,
        };
        let backend = Arc::clone(&self.backend);
        let tx = self.poll_tx.clone();
        let timeout = self.poll_timeout;
        let limit = self.stream_limit;

        self.scheduler.start(task, interval, move || {
            let backend = Arc::clone(&backend);
            let tx = tx.clone();
            async move {
                let result = match tokio::time::timeout(timeout, fetch(backend, task, limit)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout),
                };
                let _ = tx.send(CoordinatorEvent::Poll {
                    task,
                    generation,
                    result,
                });
            }
        });
    }

    fn stop_task(&mut self, task: PollTask) {
        self.scheduler.stop(&task);
        self.generations.remove(&task);
        self.connectivity.forget(&task);
    }

    // ── Diagnosis ────────────────────────────────────────────────

    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        self.session.submit(text)
    }

    /// Fresh transcript, no context, no pending selection.
    pub fn reset_session(&mut self) {
        self.session.reset();
        self.broker.clear();
        self.fallback_pending = false;
    }

    pub fn session(&self) -> &DiagnosisSession {
        &self.session
    }

    pub fn provider_mut(&mut self) -> &mut ProviderConfig {
        self.session.provider_mut()
    }

    pub async fn load_manual(&mut self) -> Result<String, BackendError> {
        self.session.load_manual().await
    }

    pub async fn save_manual(&mut self, text: String) -> Result<(), BackendError> {
        self.session.save_manual(text).await
    }

    // ── Data management ──────────────────────────────────────────

    pub async fn clear_history(&mut self, confirm: &dyn Confirm) -> Result<ClearOutcome, OpsError> {
        let outcome = self.ops.clear_history(confirm).await?;
        if matches!(outcome, ClearOutcome::Cleared(_)) {
            self.refresh_after_clear();
        }
        Ok(outcome)
    }

    pub async fn clear_events(&mut self, confirm: &dyn Confirm) -> Result<ClearOutcome, OpsError> {
        let outcome = self.ops.clear_events(confirm).await?;
        if matches!(outcome, ClearOutcome::Cleared(_)) {
            self.refresh_after_clear();
        }
        Ok(outcome)
    }

    /// Re-poll the affected data now instead of waiting for the next tick.
    /// Without a running feed task the cached feed is dropped instead.
    fn refresh_after_clear(&mut self) {
        if !self.scheduler.poll_now(&PollTask::AnomalyFeed) {
            self.feed = None;
        }
        if self.view == View::Foundation {
            self.scheduler.poll_now(&PollTask::Foundation);
        }
    }

    pub async fn export_csv(&self) -> Result<ExportReport, OpsError> {
        let points = self.feed.as_ref().map(|s| s.data.points.as_slice());
        self.ops.export_csv(points).await
    }

    // ── Offline analysis ─────────────────────────────────────────

    pub async fn algorithms(&self) -> Result<Vec<AlgorithmInfo>, BackendError> {
        self.backend.ml_algorithms().await
    }

    pub async fn run_offline_analysis(
        &self,
        algorithm: &str,
        window_size: usize,
        params: Value,
    ) -> Result<MlAnalysisResult, BackendError> {
        let request = MlAnalysisRequest {
            algorithm: algorithm.to_string(),
            window_size,
            params,
        };
        info!(algorithm, window_size, "running offline analysis");
        self.backend.ml_analyze(&request).await
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub fn line_status(&self) -> Option<&Snapshot<LineStatus>> {
        self.line_status.as_ref()
    }

    pub fn foundation(&self) -> Option<&Snapshot<FoundationData>> {
        self.foundation.as_ref()
    }

    pub fn feed(&self) -> Option<&Snapshot<AnomalyFeed>> {
        self.feed.as_ref()
    }

    pub fn events(&self) -> &[AnomalyEvent] {
        self.feed.as_ref().map_or(&[], |s| s.data.events.as_slice())
    }

    pub fn points(&self) -> &[SignalPoint] {
        self.feed.as_ref().map_or(&[], |s| s.data.points.as_slice())
    }

    pub fn connectivity(&self) -> &ConnectivityTracker<PollTask> {
        &self.connectivity
    }

    pub fn running_tasks(&self) -> Vec<PollTask> {
        self.scheduler.running()
    }
}

/// Fetch one task's endpoints; multi-endpoint tasks fail as a unit.
async fn fetch(
    backend: Arc<dyn Backend>,
    task: PollTask,
    limit: usize,
) -> Result<PollData, BackendError> {
    match task {
        PollTask::LineStatus => backend.line_status().await.map(PollData::LineStatus),
        PollTask::Foundation => {
            let (metrics, pareto) = try_join(backend.metrics(), backend.pareto()).await?;
            Ok(PollData::Foundation(FoundationData { metrics, pareto }))
        }
        PollTask::AnomalyFeed => {
            let (points, events, status, stats) = try_join4(
                backend.anomaly_stream(limit),
                backend.anomaly_events(),
                backend.anomaly_status(),
                backend.anomaly_stats(),
            )
            .await?;
            Ok(PollData::AnomalyFeed(AnomalyFeed {
                points,
                events,
                status,
                stats,
            }))
        }
    }
}
