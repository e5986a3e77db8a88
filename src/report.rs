//! Result document models and the execution log collector.
//!
//! The shapes here serialize into the single JSON document the engine
//! emits. Field order is fixed by struct declaration and map-typed
//! fields are ordered maps, so output is deterministic and friendly to
//! snapshot tests.

use crate::error::{EngineError, ErrorCode};
use crate::providers::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Passed,
    Failed,
    Error,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Error => "error",
            Status::Skipped => "skipped",
        }
    }
}

/// Execution summary statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub error_steps: usize,
    pub total_assertions: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
    pub pass_rate: f64,
    pub total_requests: usize,
    pub total_db_operations: usize,
    pub total_extractions: usize,
    pub avg_response_time: u64,
    pub max_response_time: u64,
    pub min_response_time: u64,
    pub total_data_driven_runs: usize,
}

/// Environment snapshot taken at case end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub name: String,
    pub base_url: String,
    pub variables: BTreeMap<String, Value>,
}

/// HTTP request as actually sent, after rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDetail {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub body_type: String,
    pub timeout: u64,
    pub allow_redirects: bool,
    pub verify_ssl: bool,
}

/// Normalized HTTP response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDetail {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub body_size: usize,
    pub response_time: u64,
    pub cookies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    pub target: String,
    pub expression: Option<String>,
    pub comparator: String,
    pub expected: Value,
    pub actual: Value,
    pub status: Status,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResult {
    pub name: String,
    #[serde(rename = "type")]
    pub source: String,
    pub expression: String,
    pub scope: String,
    pub value: Value,
    pub status: ExtractStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbDetail {
    pub datasource: String,
    pub sql: String,
    pub sql_rendered: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub rows: Value,
    pub execution_time: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomDetail {
    pub keyword_name: String,
    pub parameters_input: BTreeMap<String, Value>,
    pub return_value: Value,
    pub execution_time: u64,
}

/// Poll loop outcome attached to polled request steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollDetail {
    pub attempts: u32,
    pub condition_met: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitDetail {
    pub seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopDetail {
    pub kind: String,
    pub iterations: usize,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrentDetail {
    pub concurrency: usize,
    pub iterations: Vec<ConcurrentIteration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentIteration {
    pub index: usize,
    pub status: Status,
    pub steps: Vec<StepResult>,
}

/// Per-step execution record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub name: String,
    pub keyword_type: String,
    pub keyword_name: String,
    pub status: Status,
    pub start_time: String,
    pub end_time: String,
    pub duration: u64,
    pub skip_reason: Option<String>,
    pub error: Option<EngineError>,
    pub request_detail: Option<RequestDetail>,
    pub response_detail: Option<ResponseDetail>,
    pub assertion_results: Option<Vec<AssertionResult>>,
    pub extract_results: Option<Vec<ExtractResult>>,
    pub db_detail: Option<DbDetail>,
    pub custom_detail: Option<CustomDetail>,
    pub poll_detail: Option<PollDetail>,
    pub wait_detail: Option<WaitDetail>,
    pub loop_detail: Option<LoopDetail>,
    pub concurrent_detail: Option<ConcurrentDetail>,
    /// Attempts actually executed when a retry policy applied.
    pub attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub step_index: Option<usize>,
}

/// Append-only execution log. Debug entries are collected only in
/// verbose mode.
#[derive(Clone)]
pub struct LogCollector {
    clock: Arc<dyn Clock>,
    verbose: bool,
    entries: Vec<LogEntry>,
}

impl LogCollector {
    pub fn new(clock: Arc<dyn Clock>, verbose: bool) -> Self {
        Self {
            clock,
            verbose,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, level: LogLevel, message: String, step_index: Option<usize>) {
        self.entries.push(LogEntry {
            timestamp: self.clock.now().to_rfc3339(),
            level,
            message,
            step_index,
        });
    }

    pub fn info(&mut self, message: impl Into<String>, step_index: Option<usize>) {
        self.push(LogLevel::Info, message.into(), step_index);
    }

    pub fn debug(&mut self, message: impl Into<String>, step_index: Option<usize>) {
        if self.verbose {
            self.push(LogLevel::Debug, message.into(), step_index);
        }
    }

    pub fn warning(&mut self, message: impl Into<String>, step_index: Option<usize>) {
        self.push(LogLevel::Warning, message.into(), step_index);
    }

    pub fn error(&mut self, message: impl Into<String>, step_index: Option<usize>) {
        self.push(LogLevel::Error, message.into(), step_index);
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn extend(&mut self, entries: Vec<LogEntry>) {
        self.entries.extend(entries);
    }
}

impl std::fmt::Debug for LogCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCollector")
            .field("verbose", &self.verbose)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// One data-driven row execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDrivenRun {
    pub run_index: usize,
    pub parameters: BTreeMap<String, Value>,
    pub status: Status,
    pub duration: u64,
    pub summary: ExecutionSummary,
    pub steps: Vec<StepResult>,
}

/// Aggregate over all data-driven rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataDrivenResult {
    pub enabled: bool,
    pub source: String,
    pub dataset_name: String,
    pub total_runs: usize,
    pub passed_runs: usize,
    pub failed_runs: usize,
    pub pass_rate: f64,
    pub runs: Vec<DataDrivenRun>,
}

/// The top-level JSON result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub scenario_id: String,
    pub scenario_name: String,
    pub project_id: String,
    pub status: Status,
    pub start_time: String,
    pub end_time: String,
    pub duration: u64,
    pub summary: ExecutionSummary,
    pub environment: Option<EnvironmentInfo>,
    pub steps: Vec<StepResult>,
    pub data_driven: Option<DataDrivenResult>,
    pub variables: BTreeMap<String, Value>,
    pub logs: Vec<LogEntry>,
    pub error: Option<EngineError>,
}

impl ExecutionResult {
    /// A valid document for a case that never got to run: parse
    /// failures, missing files, internal errors.
    pub fn engine_error(err: EngineError, clock: &dyn Clock, scenario_name: &str) -> Self {
        let now = clock.now().to_rfc3339();
        Self {
            execution_id: String::new(),
            scenario_id: String::new(),
            scenario_name: scenario_name.to_string(),
            project_id: String::new(),
            status: Status::Error,
            start_time: now.clone(),
            end_time: now,
            duration: 0,
            summary: ExecutionSummary {
                pass_rate: 0.0,
                ..ExecutionSummary::default()
            },
            environment: None,
            steps: Vec::new(),
            data_driven: None,
            variables: BTreeMap::new(),
            logs: Vec::new(),
            error: Some(err),
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            format!(
                "{{\"status\":\"error\",\"error\":{{\"code\":\"{}\",\"message\":\"{e}\"}}}}",
                ErrorCode::EngineInternalError.as_str()
            )
        })
    }
}

/// `passed_assertions / max(1, total) * 100`, one decimal.
pub fn pass_rate(passed: usize, total: usize) -> f64 {
    let rate = passed as f64 / total.max(1) as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}
