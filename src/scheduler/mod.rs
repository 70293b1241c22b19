//! Independent periodic fetch loops, keyed by task id.
//!
//! Each task fires immediately on start and then every `interval`, never
//! faster than [`MIN_POLL_INTERVAL_MS`]. A tick
//! never waits for the previous invocation to finish, so invocations of the
//! same task may overlap; callers store results wholesale, last-arrived wins.
//!
//! `stop` holds the task's activity lock while clearing it, and the loop
//! only invokes the fetch function under that same lock, so no invocation
//! can start once `stop` has returned.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::constants::MIN_POLL_INTERVAL_MS;

struct TaskEntry {
    active: Arc<Mutex<bool>>,
    trigger: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

pub struct PollingScheduler<K> {
    tasks: HashMap<K, TaskEntry>,
}

impl<K> Default for PollingScheduler<K> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Debug> PollingScheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) `id`. The first invocation happens right away;
    /// a restarted task carries no backlog from its previous run.
    pub fn start<F, Fut>(&mut self, id: K, interval: Duration, fetch: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop(&id);
        let interval = interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS));

        let active = Arc::new(Mutex::new(true));
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();
        let flag = Arc::clone(&active);
        let label = format!("{:?}", id);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut running = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = trigger_rx.recv() => {}
                    Some(done) = running.join_next(), if !running.is_empty() => {
                        if let Err(e) = done {
                            if e.is_panic() {
                                warn!(task = %label, "poll fetch panicked");
                            }
                        }
                        continue;
                    }
                }

                let still_active = {
                    let active = flag.lock();
                    if *active {
                        running.spawn(fetch());
                    }
                    *active
                };
                if !still_active {
                    break;
                }
            }
        });

        debug!(task = ?id, interval_ms = interval.as_millis() as u64, "poll task started");
        self.tasks.insert(
            id,
            TaskEntry {
                active,
                trigger: trigger_tx,
                handle,
            },
        );
    }

    /// Stop `id`. Returns whether it was running; stopping twice is a no-op.
    /// In-flight invocations are cancelled along with the loop.
    pub fn stop(&mut self, id: &K) -> bool {
        let Some(entry) = self.tasks.remove(id) else {
            return false;
        };
        *entry.active.lock() = false;
        entry.handle.abort();
        debug!(task = ?id, "poll task stopped");
        true
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<K> = self.tasks.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Fire an extra invocation of `id` now, outside its cadence.
    pub fn poll_now(&self, id: &K) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|entry| entry.trigger.send(()).is_ok())
    }

    pub fn is_running(&self, id: &K) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn running(&self) -> Vec<K> {
        self.tasks.keys().cloned().collect()
    }
}

impl<K> Drop for PollingScheduler<K> {
    fn drop(&mut self) {
        for entry in self.tasks.values() {
            *entry.active.lock() = false;
            entry.handle.abort();
        }
    }
}
