//! Translation Service: request-level orchestration over the pair pool,
//! plus the Stats and missing-token collaborators it reports into.

pub mod missing_tokens;
pub mod service;
pub mod stats;

pub use missing_tokens::MissingTokenStore;
pub use service::{RequestOpts, ServiceConfig, TranslationService};
pub use stats::{Stats, StatsSnapshot, TimingSample};
