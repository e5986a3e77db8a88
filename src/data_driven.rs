//! Data-driven parameter sources: inline `ddts` rows or a CSV file.

use crate::error::{EngineError, ErrorCode};
use crate::model::CaseModel;
use crate::report::{pass_rate, DataDrivenResult, DataDrivenRun, Status};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Resolved parameter rows for one data-driven execution.
#[derive(Debug, Clone)]
pub struct ParameterSets {
    /// `yaml_inline` or `csv_file`.
    pub source: String,
    pub dataset_name: String,
    pub rows: Vec<BTreeMap<String, Value>>,
}

/// Resolve the case's parameter sets. Inline `ddts` wins over
/// `csv_datasource` (the loader forbids carrying both).
pub fn parameter_sets(case: &CaseModel) -> Result<Option<ParameterSets>, EngineError> {
    if let Some(ddts) = &case.ddts {
        if !ddts.parameters.is_empty() {
            return Ok(Some(ParameterSets {
                source: "yaml_inline".to_string(),
                dataset_name: ddts.name.clone(),
                rows: ddts.parameters.clone(),
            }));
        }
    }
    if let Some(csv_path) = &case.config.csv_datasource {
        if !csv_path.trim().is_empty() {
            let path = Path::new(csv_path);
            let rows = parse_csv(path)?;
            let dataset_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("csv")
                .to_string();
            return Ok(Some(ParameterSets {
                source: "csv_file".to_string(),
                dataset_name,
                rows,
            }));
        }
    }
    Ok(None)
}

/// Parse a CSV datasource: the first row is the header and defines the
/// shared key set. Cell values get scalar type inference so numeric
/// columns compare numerically in assertions.
pub fn parse_csv(path: &Path) -> Result<Vec<BTreeMap<String, Value>>, EngineError> {
    if !path.exists() {
        return Err(EngineError::new(
            ErrorCode::CsvFileNotFound,
            format!("csv datasource not found: {}", path.display()),
        ));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EngineError::new(
            ErrorCode::CsvFileNotFound,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| {
            EngineError::new(ErrorCode::CsvParseError, format!("invalid csv header: {e}"))
        })?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            EngineError::new(ErrorCode::CsvParseError, format!("invalid csv row: {e}"))
                .with_detail(e.to_string())
        })?;
        let mut row = BTreeMap::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), infer_scalar(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn infer_scalar(cell: &str) -> Value {
    match cell {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(cell.to_string())
}

/// Fold per-row runs into the `data_driven` sub-report.
pub fn aggregate(sets: &ParameterSets, runs: Vec<DataDrivenRun>) -> DataDrivenResult {
    let total = runs.len();
    let passed = runs.iter().filter(|r| r.status == Status::Passed).count();
    DataDrivenResult {
        enabled: true,
        source: sets.source.clone(),
        dataset_name: sets.dataset_name.clone(),
        total_runs: total,
        passed_runs: passed,
        failed_runs: total - passed,
        pass_rate: pass_rate(passed, total),
        runs,
    }
}
