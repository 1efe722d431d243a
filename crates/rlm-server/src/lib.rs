//! rlm-server — OpenAI-compatible HTTP front end for the recursive
//! plan / verify / escalate / revise pipeline in `orchestration`.

pub mod api;
pub mod config;
pub mod startup;

pub use api::{build_router, AppState};
pub use config::RuntimeConfig;
