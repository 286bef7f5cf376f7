//! Shared types and error kinds for the translation gateway.

pub mod error;
pub mod types;

pub use error::GatewayError;
pub use types::{LangCode, ModeKind, PairKey, PipelineState};
