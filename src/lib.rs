//! # Linewatch
//!
//! Coordinates live monitoring of a production line: periodic polling of
//! the line backend, anomaly handoff into an AI-assisted diagnosis session,
//! and operator data management (CSV export, destructive clears).

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod coordinator;
pub mod diagnosis;
pub mod error;
pub mod handoff;
pub mod models;
pub mod ops;
pub mod scheduler;
