//! The diagnosis session state machine.
//!
//! `Idle -> AwaitingResponse -> Idle`, with the bound anomaly context as an
//! orthogonal side channel. Analyze requests run on spawned tasks and come
//! back as [`AnalysisReply`] values on the session's reply channel; the
//! owner feeds them to [`DiagnosisSession::resolve`]. Only the reply whose
//! ticket is outstanding is applied.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conversation::Transcript;
use super::provider::ProviderConfig;
use crate::backend::Backend;
use crate::constants::{ANALYZE_TRANSPORT_FAILURE, AUTO_DIAGNOSE_QUERY};
use crate::error::BackendError;
use crate::handoff::AnomalyDeduplicator;
use crate::models::{AnalyzeRequest, AnalyzeResponse, AnomalyEvent};

/// Outcome of one analyze request, tagged with the ticket it was issued under.
#[derive(Debug)]
pub struct AnalysisReply {
    pub ticket: u64,
    pub outcome: Result<AnalyzeResponse, BackendError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse { ticket: u64 },
}

/// Result of [`DiagnosisSession::set_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    /// New anomaly: transcript reset and automatic diagnosis issued.
    AutoDiagnosing { ticket: u64 },
    /// Same anomaly as the last one routed: no request, transcript kept.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { ticket: u64 },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    /// The reply belonged to a superseded or dropped request.
    Discarded,
}

/// Sends a transport failure for its ticket if dropped without replying,
/// so a panicking or aborted request task still releases the session.
struct ReplyGuard {
    ticket: u64,
    tx: Option<mpsc::UnboundedSender<AnalysisReply>>,
}

impl ReplyGuard {
    fn new(ticket: u64, tx: mpsc::UnboundedSender<AnalysisReply>) -> Self {
        Self {
            ticket,
            tx: Some(tx),
        }
    }

    fn send(mut self, outcome: Result<AnalyzeResponse, BackendError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(AnalysisReply {
                ticket: self.ticket,
                outcome,
            });
        }
    }
}

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(AnalysisReply {
                ticket: self.ticket,
                outcome: Err(BackendError::Connection(
                    "analysis task ended without a reply".into(),
                )),
            });
        }
    }
}

pub struct DiagnosisSession {
    backend: Arc<dyn Backend>,
    replies: mpsc::UnboundedSender<AnalysisReply>,
    analyze_timeout: Duration,
    dedup: AnomalyDeduplicator,
    context: Option<AnomalyEvent>,
    transcript: Transcript,
    provider: ProviderConfig,
    manual: Option<String>,
    state: SessionState,
    in_flight: Option<JoinHandle<()>>,
    next_ticket: u64,
}

impl DiagnosisSession {
    pub fn new(
        backend: Arc<dyn Backend>,
        replies: mpsc::UnboundedSender<AnalysisReply>,
        provider: ProviderConfig,
        analyze_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            replies,
            analyze_timeout,
            dedup: AnomalyDeduplicator::new(),
            context: None,
            transcript: Transcript::new(),
            provider,
            manual: None,
            state: SessionState::Idle,
            in_flight: None,
            next_ticket: 1,
        }
    }

    // ── Context ──────────────────────────────────────────────────

    /// Bind an explicitly selected anomaly.
    ///
    /// A new identity resets the transcript, appends the automatic query and
    /// issues it, preempting any request in flight. The identity routed last
    /// is refused by the deduplicator: nothing is sent and the transcript is
    /// kept, though the context is re-bound if a reset had cleared it.
    pub fn set_context(&mut self, event: AnomalyEvent) -> ContextChange {
        let identity = event.identity();
        let ticket = self.take_ticket();

        if !self.dedup.try_route(&identity, ticket) {
            if self.context.as_ref().map(AnomalyEvent::identity) != Some(identity) {
                self.context = Some(event);
            }
            return ContextChange::Duplicate;
        }

        info!(identity = %identity, ticket, "anomaly handed off, auto-diagnosing");
        self.context = Some(event);
        self.transcript.reset();
        self.transcript.add_user_message(AUTO_DIAGNOSE_QUERY);
        self.dispatch(AUTO_DIAGNOSE_QUERY, ticket);
        ContextChange::AutoDiagnosing { ticket }
    }

    /// Bind `event` without touching the transcript or issuing a request.
    /// Only takes effect while nothing is bound and nothing is in flight.
    pub fn bind_fallback(&mut self, event: AnomalyEvent) -> bool {
        if self.context.is_some() || self.is_awaiting() {
            return false;
        }
        debug!(identity = %event.identity(), "bound newest anomaly as fallback context");
        self.context = Some(event);
        true
    }

    pub fn context(&self) -> Option<&AnomalyEvent> {
        self.context.as_ref()
    }

    // ── Chat ─────────────────────────────────────────────────────

    /// Send an operator query. Blank text and queries made while a reply
    /// is outstanding are ignored.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::Ignored(IgnoreReason::Empty);
        }
        if self.is_awaiting() {
            debug!("query ignored while awaiting a reply");
            return SubmitOutcome::Ignored(IgnoreReason::Busy);
        }

        let ticket = self.take_ticket();
        self.transcript.add_user_message(text);
        self.dispatch(text, ticket);
        SubmitOutcome::Submitted { ticket }
    }

    /// Apply a reply from the reply channel.
    pub fn resolve(&mut self, reply: AnalysisReply) -> Resolution {
        self.dedup.complete(reply.ticket);

        if self.state != (SessionState::AwaitingResponse { ticket: reply.ticket }) {
            debug!(ticket = reply.ticket, "discarding stale analysis reply");
            return Resolution::Discarded;
        }

        match reply.outcome {
            Ok(AnalyzeResponse::Answer(text)) => self.transcript.add_assistant_message(&text),
            Ok(AnalyzeResponse::Reported(err)) | Err(BackendError::Reported(err)) => {
                warn!(ticket = reply.ticket, error = %err, "analysis backend reported an error");
                self.transcript.add_system_message(&format!("Error: {}", err));
            }
            Err(err) => {
                warn!(ticket = reply.ticket, error = %err, "analysis request failed");
                self.transcript.add_system_message(ANALYZE_TRANSPORT_FAILURE);
            }
        }

        debug!(ticket = reply.ticket, "analysis reply applied");
        self.state = SessionState::Idle;
        self.in_flight = None;
        Resolution::Applied
    }

    /// Back to a fresh greeting with no context. Any reply still in flight
    /// will be discarded; the last routed identity is remembered.
    pub fn reset(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        self.dedup.abandon();
        self.state = SessionState::Idle;
        self.context = None;
        self.transcript.reset();
        info!("diagnosis session reset");
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, SessionState::AwaitingResponse { .. })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut ProviderConfig {
        &mut self.provider
    }

    // ── Manual ───────────────────────────────────────────────────

    /// Fetch the runbook. A failed load keeps the cached text.
    pub async fn load_manual(&mut self) -> Result<String, BackendError> {
        let text = self.backend.fetch_manual().await?;
        self.manual = Some(text.clone());
        Ok(text)
    }

    /// Persist the whole runbook. Last save wins.
    pub async fn save_manual(&mut self, text: String) -> Result<(), BackendError> {
        self.backend.save_manual(&text).await?;
        info!(chars = text.chars().count(), "manual saved");
        self.manual = Some(text);
        Ok(())
    }

    pub fn manual(&self) -> Option<&str> {
        self.manual.as_deref()
    }

    // ── Internals ────────────────────────────────────────────────

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn dispatch(&mut self, query: &str, ticket: u64) {
        let request = AnalyzeRequest {
            query: query.to_string(),
            provider: self.provider.wire_name().to_string(),
            config: self.provider.wire_config(),
            anomaly_context: self.context.clone(),
            anomaly_id: self.context.as_ref().and_then(|e| e.id),
        };
        let backend = Arc::clone(&self.backend);
        let guard = ReplyGuard::new(ticket, self.replies.clone());
        let timeout = self.analyze_timeout;

        let handle = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, backend.analyze(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Timeout),
            };
            guard.send(outcome);
        });

        if let Some(previous) = self.in_flight.replace(handle) {
            previous.abort();
        }
        self.state = SessionState::AwaitingResponse { ticket };
        debug!(ticket, provider = self.provider.wire_name(), "analysis request dispatched");
    }
}
