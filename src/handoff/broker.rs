use crate::models::AnomalyEvent;

/// How a handoff target was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOrigin {
    /// The operator selected the event.
    Explicit,
    /// Nothing was selected; the newest known event was used instead.
    /// Never triggers an automatic diagnosis.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub event: AnomalyEvent,
    pub origin: HandoffOrigin,
}

/// Signal returned by [`HandoffBroker::select`]: the diagnosis view should
/// be activated for this target.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub target: AnomalyEvent,
}

/// Carries an operator-selected anomaly from the monitoring side to the
/// diagnosis session. The session owns clearing.
#[derive(Debug, Default)]
pub struct HandoffBroker {
    pending: Option<AnomalyEvent>,
}

impl HandoffBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, event: AnomalyEvent) -> Activation {
        self.pending = Some(event.clone());
        Activation { target: event }
    }

    /// The pending selection, or else the newest of `known_events`.
    /// Does not clear the selection.
    pub fn consume(&self, known_events: &[AnomalyEvent]) -> Option<Handoff> {
        if let Some(event) = &self.pending {
            return Some(Handoff {
                event: event.clone(),
                origin: HandoffOrigin::Explicit,
            });
        }
        AnomalyEvent::newest(known_events).map(|event| Handoff {
            event: event.clone(),
            origin: HandoffOrigin::Fallback,
        })
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
