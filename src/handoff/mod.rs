//! Routing of selected anomalies into the diagnosis session.

mod broker;
mod dedup;

pub use broker::{Activation, Handoff, HandoffBroker, HandoffOrigin};
pub use dedup::AnomalyDeduplicator;
