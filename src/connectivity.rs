//! Backend reachability per data domain.
//!
//! Each polling task reports its outcome here. A domain reads as
//! disconnected from its first failed fetch until the next successful one;
//! only the flips are logged, not every failed tick.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::error::BackendError;

/// Health of one data domain.
#[derive(Debug, Clone, Default)]
pub struct DomainHealth {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

/// Aggregate view over every domain seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    /// Nothing has reported yet.
    Unknown,
    Connected,
    /// Some domains connected, others not.
    Degraded,
    Disconnected,
}

#[derive(Debug)]
pub struct ConnectivityTracker<D> {
    domains: HashMap<D, DomainHealth>,
}

impl<D> Default for ConnectivityTracker<D> {
    fn default() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }
}

impl<D: Eq + Hash + Clone + Debug> ConnectivityTracker<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful fetch. Returns true if the domain just came back.
    pub fn record_success(&mut self, domain: D) -> bool {
        let health = self.domains.entry(domain.clone()).or_default();
        let flipped = !health.connected;
        if flipped && health.consecutive_failures > 0 {
            info!(
                domain = ?domain,
                after_failures = health.consecutive_failures,
                "backend reachable again"
            );
        }
        health.connected = true;
        health.consecutive_failures = 0;
        health.last_success = Some(Local::now());
        health.last_error = None;
        flipped
    }

    /// Record a failed fetch. Returns true if the domain just went down.
    ///
    /// Only transport failures count; a reported error means the backend
    /// answered.
    pub fn record_failure(&mut self, domain: D, err: &BackendError) -> bool {
        if !err.is_transport() {
            self.record_success(domain);
            return false;
        }
        let health = self.domains.entry(domain.clone()).or_default();
        let flipped = health.connected || health.consecutive_failures == 0;
        if flipped {
            warn!(domain = ?domain, error = %err, "backend unreachable");
        }
        health.connected = false;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(err.to_string());
        flipped
    }

    /// A domain with no successful fetch yet reads as disconnected.
    pub fn is_connected(&self, domain: &D) -> bool {
        self.domains.get(domain).is_some_and(|h| h.connected)
    }

    pub fn health(&self, domain: &D) -> Option<&DomainHealth> {
        self.domains.get(domain)
    }

    pub fn overall(&self) -> Overall {
        if self.domains.is_empty() {
            return Overall::Unknown;
        }
        let up = self.domains.values().filter(|h| h.connected).count();
        match up {
            0 => Overall::Disconnected,
            n if n == self.domains.len() => Overall::Connected,
            _ => Overall::Degraded,
        }
    }

    /// Forget a domain, e.g. when its polling task stops.
    pub fn forget(&mut self, domain: &D) {
        self.domains.remove(domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> BackendError {
        BackendError::Connection("connection refused".into())
    }

    // ── Transitions ───────────────────────────────────────────────

    #[test]
    fn unknown_domain_reads_disconnected() {
        let t: ConnectivityTracker<&str> = ConnectivityTracker::new();
        assert!(!t.is_connected(&"status"));
        assert_eq!(t.overall(), Overall::Unknown);
    }

    #[test]
    fn three_failures_stay_disconnected_until_success() {
        let mut t = ConnectivityTracker::new();
        t.record_success("status");

        assert!(t.record_failure("status", &refused()));
        assert!(!t.is_connected(&"status"));
        assert!(!t.record_failure("status", &BackendError::Timeout));
        assert!(!t.record_failure("status", &refused()));
        assert!(!t.is_connected(&"status"));
        assert_eq!(t.health(&"status").unwrap().consecutive_failures, 3);

        assert!(t.record_success("status"));
        assert!(t.is_connected(&"status"));
        assert_eq!(t.health(&"status").unwrap().consecutive_failures, 0);
        assert!(t.health(&"status").unwrap().last_error.is_none());
    }

    #[test]
    fn first_failure_counts_as_flip() {
        let mut t = ConnectivityTracker::new();
        assert!(t.record_failure("feed", &refused()));
        assert!(!t.record_failure("feed", &refused()));
    }

    #[test]
    fn reported_error_means_reachable() {
        let mut t = ConnectivityTracker::new();
        let went_down =
            t.record_failure("feed", &BackendError::Reported("model not ready".into()));
        assert!(!went_down);
        assert!(t.is_connected(&"feed"));
    }

    // ── Aggregate ─────────────────────────────────────────────────

    #[test]
    fn overall_reflects_mix() {
        let mut t = ConnectivityTracker::new();
        t.record_success("status");
        t.record_success("feed");
        assert_eq!(t.overall(), Overall::Connected);

        t.record_failure("feed", &refused());
        assert_eq!(t.overall(), Overall::Degraded);

        t.record_failure("status", &refused());
        assert_eq!(t.overall(), Overall::Disconnected);

        t.forget(&"feed");
        t.forget(&"status");
        assert_eq!(t.overall(), Overall::Unknown);
    }
}
