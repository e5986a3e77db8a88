//! Unified error type and machine-readable error codes.
//!
//! Three classes of failure flow through the engine and each takes a
//! different path through the result document:
//!
//! - engine errors abort the case and surface as the top-level `error`
//! - step errors are recorded on the step (`status=error`) and the run
//!   continues
//! - assertion failures are data, never errors; they mark the step
//!   `failed` without short-circuiting anything

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes, serialized verbatim into result
/// documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Engine scope
    FileNotFound,
    YamlParseError,
    YamlValidationError,
    CsvFileNotFound,
    CsvParseError,
    EngineInternalError,
    TimeoutError,
    // Step scope
    RequestTimeout,
    RequestConnectionError,
    RequestSslError,
    DbConnectionError,
    DbQueryError,
    DbDatasourceNotFound,
    KeywordNotFound,
    KeywordExecutionError,
    VariableNotFound,
    VariableRenderError,
    // Rule scope
    AssertionFailed,
    ExtractFailed,
}

impl ErrorCode {
    /// Engine-scope codes abort the whole case.
    pub fn is_engine(&self) -> bool {
        matches!(
            self,
            ErrorCode::FileNotFound
                | ErrorCode::YamlParseError
                | ErrorCode::YamlValidationError
                | ErrorCode::CsvFileNotFound
                | ErrorCode::CsvParseError
                | ErrorCode::EngineInternalError
                | ErrorCode::TimeoutError
        )
    }

    /// The retry-kind bucket this code belongs to, matched against
    /// `retry_policy.retry_on` / `stop_on` entries.
    pub fn retry_kind(&self) -> &'static str {
        match self {
            ErrorCode::RequestTimeout => "timeout",
            ErrorCode::RequestConnectionError => "connection",
            ErrorCode::RequestSslError => "ssl",
            ErrorCode::DbConnectionError
            | ErrorCode::DbQueryError
            | ErrorCode::DbDatasourceNotFound => "db",
            ErrorCode::KeywordNotFound | ErrorCode::KeywordExecutionError => {
                "keyword"
            }
            ErrorCode::VariableNotFound | ErrorCode::VariableRenderError => {
                "variable"
            }
            _ => "engine",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::YamlParseError => "YAML_PARSE_ERROR",
            ErrorCode::YamlValidationError => "YAML_VALIDATION_ERROR",
            ErrorCode::CsvFileNotFound => "CSV_FILE_NOT_FOUND",
            ErrorCode::CsvParseError => "CSV_PARSE_ERROR",
            ErrorCode::EngineInternalError => "ENGINE_INTERNAL_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::RequestConnectionError => "REQUEST_CONNECTION_ERROR",
            ErrorCode::RequestSslError => "REQUEST_SSL_ERROR",
            ErrorCode::DbConnectionError => "DB_CONNECTION_ERROR",
            ErrorCode::DbQueryError => "DB_QUERY_ERROR",
            ErrorCode::DbDatasourceNotFound => "DB_DATASOURCE_NOT_FOUND",
            ErrorCode::KeywordNotFound => "KEYWORD_NOT_FOUND",
            ErrorCode::KeywordExecutionError => "KEYWORD_EXECUTION_ERROR",
            ErrorCode::VariableNotFound => "VARIABLE_NOT_FOUND",
            ErrorCode::VariableRenderError => "VARIABLE_RENDER_ERROR",
            ErrorCode::AssertionFailed => "ASSERTION_FAILED",
            ErrorCode::ExtractFailed => "EXTRACT_FAILED",
        }
    }
}

/// The single error currency of the engine: a code, a human-readable
/// message, and an optional detail shown only in verbose mode.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EngineInternalError, message)
    }
}
