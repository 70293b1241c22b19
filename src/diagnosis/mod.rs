//! AI-assisted diagnosis: transcript, provider settings and the session
//! that runs the analyze protocol.

mod context;
mod conversation;
mod provider;
mod session;

pub use context::ContextView;
pub use conversation::{ChatMessage, Role, Transcript};
pub use provider::{ProviderConfig, ProviderKind};
pub use session::{
    AnalysisReply, ContextChange, DiagnosisSession, IgnoreReason, Resolution, SessionState,
    SubmitOutcome,
};
