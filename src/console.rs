//! Line-oriented operator console.
//!
//! Reads commands from stdin, forwards them to the coordinator and prints
//! transcript updates. Confirmation prompts read the next input line.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Mutex;
use tracing::warn;

use linewatch::constants::{DEFAULT_ML_WINDOW, SIGNAL_NAMES, TRANSCRIPT_WRAP_WIDTH};
use linewatch::coordinator::{Coordinator, CoordinatorEvent, Update, View};
use linewatch::diagnosis::{
    ChatMessage, ContextChange, ContextView, IgnoreReason, ProviderKind, Resolution, SessionState,
    SubmitOutcome,
};
use linewatch::error::OpsError;
use linewatch::ops::{ClearOutcome, Confirm, ConfirmRequest};

const HELP: &str = "\
Commands:
  status                      line, connectivity and session summary
  view <foundation|anomaly|diagnosis>
  events                      list anomaly events (newest first)
  points                      list anomalous stream points
  diagnose <n>                hand event n to the diagnosis view
  inspect <n> <signal>        hand stream point n to the diagnosis view
  ask <text>                  query the assistant (bare text works in diagnosis)
  context                     show the bound anomaly
  provider <local|remote>
  set <url|model|key> <value> provider settings
  manual                      show the maintenance manual
  manual save <file>          replace the manual with a file's contents
  export                      write the anomaly history as CSV
  clear-history | clear-events
  ml algorithms
  ml run <algorithm> [window]
  reset                       start a fresh conversation
  quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Url,
    Model,
    Key,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    View(View),
    Events,
    Points,
    Context,
    Diagnose(usize),
    Inspect { index: usize, signal: String },
    Ask(String),
    Provider(ProviderKind),
    Set(Setting, String),
    Manual,
    ManualSave(PathBuf),
    Export,
    ClearHistory,
    ClearEvents,
    Algorithms,
    MlRun { algorithm: String, window: usize },
    Reset,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`; in the diagnosis view
    /// anything that is not a command is a query.
    pub fn parse(line: &str, view: View) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match (word.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("help" | "?", _) => Command::Help,
            ("status", []) => Command::Status,
            ("view", [name]) => Command::View(name.parse()?),
            ("events", []) => Command::Events,
            ("points", []) => Command::Points,
            ("context", []) => Command::Context,
            ("diagnose", [n]) => Command::Diagnose(parse_index(n)?),
            ("inspect", [n, signal]) => {
                let signal = signal.to_ascii_lowercase();
                if !SIGNAL_NAMES.contains(&signal.as_str()) {
                    return Err(format!(
                        "unknown signal '{}' (expected {})",
                        signal,
                        SIGNAL_NAMES.join(", ")
                    ));
                }
                Command::Inspect {
                    index: parse_index(n)?,
                    signal,
                }
            }
            ("ask", _) if !rest.is_empty() => Command::Ask(rest.to_string()),
            ("provider", [kind]) => Command::Provider(kind.parse()?),
            ("set", [field, ..]) => {
                let value = rest[field.len()..].trim();
                if value.is_empty() {
                    return Err("usage: set <url|model|key> <value>".into());
                }
                let setting = match field.to_ascii_lowercase().as_str() {
                    "url" => Setting::Url,
                    "model" => Setting::Model,
                    "key" => Setting::Key,
                    other => return Err(format!("unknown setting '{}'", other)),
                };
                Command::Set(setting, value.to_string())
            }
            ("manual", []) => Command::Manual,
            ("manual", ["save", path]) => Command::ManualSave(PathBuf::from(*path)),
            ("export", []) => Command::Export,
            ("clear-history", []) => Command::ClearHistory,
            ("clear-events", []) => Command::ClearEvents,
            ("ml", ["algorithms"]) => Command::Algorithms,
            ("ml", ["run", algorithm]) => Command::MlRun {
                algorithm: algorithm.to_string(),
                window: DEFAULT_ML_WINDOW,
            },
            ("ml", ["run", algorithm, window]) => Command::MlRun {
                algorithm: algorithm.to_string(),
                window: window
                    .parse()
                    .map_err(|_| format!("invalid window '{}'", window))?,
            },
            ("reset", []) => Command::Reset,
            ("quit" | "exit", []) => Command::Quit,
            _ if view == View::Diagnosis => Command::Ask(line.to_string()),
            _ => return Err(format!("unknown command '{}' (try help)", line)),
        };
        Ok(Some(command))
    }
}

fn parse_index(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("invalid index '{}'", s))
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Transcript message as printed on the console.
pub fn render_message(message: &ChatMessage, width: usize) -> String {
    let options = textwrap::Options::new(width)
        .initial_indent("  ")
        .subsequent_indent("  ");
    format!(
        "[{}] {}:\n{}",
        message.timestamp.format("%H:%M:%S"),
        message.role.label(),
        textwrap::fill(&message.content, options)
    )
}

/// Answers confirmation requests from the shared input stream.
pub struct LineConfirm<R> {
    input: Arc<Mutex<Lines<R>>>,
}

#[async_trait]
impl<R> Confirm for LineConfirm<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn confirm(&self, request: &ConfirmRequest) -> bool {
        println!("{}", request.warning);
        print!("Type 'yes' to proceed: ");
        let _ = std::io::stdout().flush();

        let mut lines = self.input.lock().await;
        matches!(lines.next_line().await, Ok(Some(answer)) if is_affirmative(&answer))
    }
}

fn report_clear(outcome: Result<ClearOutcome, OpsError>) {
    match outcome {
        Ok(ClearOutcome::Declined) => println!("Cancelled."),
        Ok(ClearOutcome::Cleared(report)) => println!("{}", report.message),
        Err(e) => println!("Clear failed: {}", e),
    }
}

enum Step {
    Line(Option<String>),
    Event(Option<CoordinatorEvent>),
}

pub struct Console<R> {
    coordinator: Coordinator,
    input: Arc<Mutex<Lines<R>>>,
    /// Transcript messages already printed.
    seen: usize,
}

impl<R> Console<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(coordinator: Coordinator, input: Lines<R>) -> Self {
        Self {
            coordinator,
            input: Arc::new(Mutex::new(input)),
            seen: 0,
        }
    }

    /// Run until `quit` or end of input.
    pub async fn run(mut self) -> Result<()> {
        self.coordinator.start();
        if let Err(e) = self.coordinator.load_manual().await {
            warn!(error = %e, "manual not loaded at startup");
        }
        println!("linewatch: {} view. Type 'help' for commands.", self.coordinator.view());

        loop {
            let input = Arc::clone(&self.input);
            let step = {
                let mut lines = input.lock().await;
                tokio::select! {
                    line = lines.next_line() => Step::Line(line.context("reading operator input")?),
                    event = self.coordinator.next_event() => Step::Event(event),
                }
            };

            match step {
                Step::Line(None) | Step::Event(None) => break,
                Step::Line(Some(line)) => {
                    let command = match Command::parse(&line, self.coordinator.view()) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    };
                    if command == Command::Quit {
                        break;
                    }
                    self.execute(command).await;
                }
                Step::Event(Some(event)) => self.on_event(event),
            }
        }

        self.coordinator.shutdown();
        Ok(())
    }

    fn on_event(&mut self, event: CoordinatorEvent) {
        match self.coordinator.handle_event(event) {
            Update::Polled {
                task,
                reconnected,
                fallback_bound,
            } => {
                if reconnected {
                    println!("[link] {}: connected", task);
                }
                if fallback_bound {
                    println!("{}", ContextView::describe(self.coordinator.session().context()));
                }
            }
            Update::PollFailed {
                task,
                disconnected: true,
                error,
            } => println!("[link] {}: disconnected ({})", task, error),
            Update::Analysis(Resolution::Applied) => self.print_new_messages(),
            Update::PollFailed { .. } | Update::Stale { .. } | Update::Analysis(_) => {}
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Help => println!("{}", HELP),
            Command::Status => self.print_status(),
            Command::View(view) => {
                let change = self.coordinator.activate(view);
                println!("Switched to {} view.", view);
                if view == View::Diagnosis {
                    self.report_change(change);
                }
            }
            Command::Events => {
                let events = self.coordinator.events();
                if events.is_empty() {
                    println!("No anomaly events loaded. The anomaly and diagnosis views poll them.");
                }
                for (i, event) in events.iter().enumerate() {
                    println!("{}", ContextView::event_row(i, event));
                }
            }
            Command::Points => self.print_points(),
            Command::Context => {
                println!("{}", ContextView::describe(self.coordinator.session().context()))
            }
            Command::Diagnose(index) => match self.coordinator.events().get(index).cloned() {
                Some(event) => {
                    let change = self.coordinator.select_event(event);
                    self.report_change(change);
                }
                None => println!("No event {}.", index),
            },
            Command::Inspect { index, signal } => {
                match self.coordinator.point_event(index, &signal) {
                    Some(event) => {
                        let change = self.coordinator.select_event(event);
                        self.report_change(change);
                    }
                    None => println!("Point {} is not an anomaly.", index),
                }
            }
            Command::Ask(text) => match self.coordinator.submit(&text) {
                SubmitOutcome::Submitted { .. } => self.print_new_messages(),
                SubmitOutcome::Ignored(IgnoreReason::Busy) => {
                    println!("Still waiting for the previous answer.")
                }
                SubmitOutcome::Ignored(IgnoreReason::Empty) => {}
            },
            Command::Provider(kind) => {
                let provider = self.coordinator.provider_mut();
                provider.set_kind(kind);
                println!("Provider: {}", provider.describe());
            }
            Command::Set(setting, value) => {
                let provider = self.coordinator.provider_mut();
                match setting {
                    Setting::Url => provider.endpoint_url = value,
                    Setting::Model => provider.model_name = value,
                    Setting::Key => provider.api_key = value,
                }
                println!("Provider: {}", provider.describe());
            }
            Command::Manual => {
                let cached = self.coordinator.session().manual().map(str::to_string);
                let text = match cached {
                    Some(text) => Ok(text),
                    None => self.coordinator.load_manual().await,
                };
                match text {
                    Ok(text) if text.trim().is_empty() => println!("The manual is empty."),
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("Could not load the manual: {}", e),
                }
            }
            Command::ManualSave(path) => match tokio::fs::read_to_string(&path).await {
                Ok(text) => match self.coordinator.save_manual(text).await {
                    Ok(()) => println!("Manual saved."),
                    Err(e) => println!("Could not save the manual: {}", e),
                },
                Err(e) => println!("Could not read {}: {}", path.display(), e),
            },
            Command::Export => match self.coordinator.export_csv().await {
                Ok(report) => println!("Exported {} rows to {}", report.rows, report.path.display()),
                Err(OpsError::NothingToExport) => {
                    println!("Nothing to export yet. Load the anomaly view first.")
                }
                Err(e) => println!("Export failed: {}", e),
            },
            Command::ClearHistory => {
                let confirm = self.confirmer();
                let outcome = self.coordinator.clear_history(&confirm).await;
                report_clear(outcome);
            }
            Command::ClearEvents => {
                let confirm = self.confirmer();
                let outcome = self.coordinator.clear_events(&confirm).await;
                report_clear(outcome);
            }
            Command::Algorithms => match self.coordinator.algorithms().await {
                Ok(algorithms) => {
                    for a in algorithms {
                        match a.description {
                            Some(d) => println!("  {:<20} {} - {}", a.id, a.name, d),
                            None => println!("  {:<20} {}", a.id, a.name),
                        }
                    }
                }
                Err(e) => println!("Could not list algorithms: {}", e),
            },
            Command::MlRun { algorithm, window } => {
                let params = serde_json::json!({});
                match self
                    .coordinator
                    .run_offline_analysis(&algorithm, window, params)
                    .await
                {
                    Ok(result) => println!(
                        "{}: {} anomalies\n{}",
                        result.algorithm.as_deref().unwrap_or(&algorithm),
                        result.anomaly_count,
                        result.summary_text()
                    ),
                    Err(e) => println!("Analysis failed: {}", e),
                }
            }
            Command::Reset => {
                self.coordinator.reset_session();
                self.reprint_transcript();
            }
            Command::Quit => {}
        }
    }

    fn confirmer(&self) -> LineConfirm<R> {
        LineConfirm {
            input: Arc::clone(&self.input),
        }
    }

    fn report_change(&mut self, change: Option<ContextChange>) {
        let session = self.coordinator.session();
        match change {
            Some(ContextChange::AutoDiagnosing { .. }) => {
                println!("{}", ContextView::describe(session.context()));
                self.reprint_transcript();
            }
            Some(ContextChange::Duplicate) => {
                println!("Already diagnosing this anomaly; conversation kept.");
            }
            None if session.context().is_none() => {
                println!("Waiting for anomaly events to bind as context.");
            }
            None => println!("{}", ContextView::describe(session.context())),
        }
    }

    fn print_status(&self) {
        let c = &self.coordinator;
        println!("View: {}", c.view());
        match c.line_status() {
            Some(s) => println!(
                "Line: {} (as of {})",
                s.data.summary(),
                s.received_at.format("%H:%M:%S")
            ),
            None => println!("Line: no data yet"),
        }
        println!("Backend: {:?}", c.connectivity().overall());
        let mut tasks = c.running_tasks();
        tasks.sort_by_key(|t| t.to_string());
        for task in tasks {
            let state = match c.connectivity().health(&task) {
                Some(h) if h.connected => "connected".to_string(),
                Some(h) => format!(
                    "disconnected, {} failure(s): {}",
                    h.consecutive_failures,
                    h.last_error.as_deref().unwrap_or("unknown")
                ),
                None => "waiting".to_string(),
            };
            println!("  {:<20} {}", task.to_string(), state);
        }
        if let Some(feed) = c.feed() {
            let status = &feed.data.status;
            println!(
                "Detector: {} (model {}), {} points, {} events",
                status.status,
                if status.model_ready { "ready" } else { "calibrating" },
                feed.data.points.len(),
                feed.data.events.len()
            );
        }
        let session = c.session();
        let state = match session.state() {
            SessionState::Idle => "idle".to_string(),
            SessionState::AwaitingResponse { ticket } => format!("awaiting reply #{}", ticket),
        };
        println!("Diagnosis: {}, provider {}", state, session.provider().describe());
        if let Some(event) = session.context() {
            println!("Context: {}", event.identity());
        }
    }

    fn print_points(&self) {
        let Some(feed) = self.coordinator.feed() else {
            println!("No stream loaded. The anomaly and diagnosis views poll it.");
            return;
        };
        let anomalous: Vec<_> = feed
            .data
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_anomalous())
            .collect();
        println!(
            "{} points, {} anomalous",
            feed.data.points.len(),
            anomalous.len()
        );
        for (i, point) in anomalous {
            println!("{}", ContextView::point_row(i, point));
        }
        for (signal, band) in &feed.data.stats {
            println!(
                "  {:<12} mean {:.2} (band {:.2} .. {:.2})",
                signal, band.mean, band.lower_bound, band.upper_bound
            );
        }
    }

    fn print_new_messages(&mut self) {
        let transcript = self.coordinator.session().transcript();
        if transcript.len() < self.seen {
            self.seen = 0;
        }
        for message in transcript.since(self.seen) {
            println!("{}", render_message(message, TRANSCRIPT_WRAP_WIDTH));
        }
        self.seen = transcript.len();
    }

    fn reprint_transcript(&mut self) {
        self.seen = 0;
        self.print_new_messages();
    }
}
