use tracing::debug;

use crate::models::AnomalyIdentity;

/// Guard that lets a given anomaly identity trigger at most one automatic
/// diagnosis.
///
/// Only the immediate predecessor is remembered. A repeat of the last
/// routed identity is refused whether or not its request is still in
/// flight; a different identity is always accepted and supersedes whatever
/// routing is outstanding.
#[derive(Debug, Default)]
pub struct AnomalyDeduplicator {
    last_routed: Option<AnomalyIdentity>,
    /// Ticket of the analyze request issued for `last_routed`.
    in_flight: Option<u64>,
}

impl AnomalyDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `identity` would be accepted by [`try_route`](Self::try_route).
    pub fn should_route(&self, identity: &AnomalyIdentity) -> bool {
        self.last_routed.as_ref() != Some(identity)
    }

    /// Accept or refuse `identity`. On acceptance the identity becomes the
    /// last routed one and `ticket` the routing in flight.
    pub fn try_route(&mut self, identity: &AnomalyIdentity, ticket: u64) -> bool {
        if !self.should_route(identity) {
            debug!(identity = %identity, "duplicate handoff suppressed");
            return false;
        }
        if let Some(previous) = self.in_flight {
            debug!(identity = %identity, superseded_ticket = previous, "handoff preempts routing in flight");
        }
        self.last_routed = Some(identity.clone());
        self.in_flight = Some(ticket);
        true
    }

    /// Release the routing for `ticket`. A ticket that was already
    /// superseded leaves the current routing untouched.
    pub fn complete(&mut self, ticket: u64) -> bool {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Drop the routing in flight without forgetting the last identity.
    pub fn abandon(&mut self) {
        self.in_flight = None;
    }

    pub fn is_routing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_routed(&self) -> Option<&AnomalyIdentity> {
        self.last_routed.as_ref()
    }
}
