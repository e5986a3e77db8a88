//! sisyphus: a YAML-driven API test orchestration engine.
//!
//! A case file declares a sequence of steps (HTTP requests, DB
//! queries, assertions, extractions, waits, loops, concurrent
//! fan-outs, polls); the engine executes them with `{{...}}` template
//! substitution, collects per-step results and emits a single
//! structured JSON document.

pub mod comparators;
pub mod config;
pub mod custom;
pub mod data_driven;
pub mod db;
pub mod error;
pub mod extractor;
pub mod http;
pub mod jsonpath;
pub mod loader;
pub mod model;
pub mod poll;
pub mod providers;
pub mod report;
pub mod retry;
pub mod runner;
pub mod template;
pub mod validator;
pub mod variables;

pub use config::GlobalProfiles;
pub use error::{EngineError, ErrorCode};
pub use loader::load_case;
pub use model::*;
pub use report::{ExecutionResult, Status};
pub use runner::ScenarioRunner;
pub use variables::VariablePool;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
