//! Case loading: read YAML, deserialize, validate structure, assign
//! step indices.
//!
//! Failures map onto the engine taxonomy: missing file is
//! `FILE_NOT_FOUND`, malformed YAML is `YAML_PARSE_ERROR`, a
//! well-formed document that violates the schema or the structural
//! invariants is `YAML_VALIDATION_ERROR` with a human-readable path
//! such as `teststeps[2].request.body`.

use crate::error::{EngineError, ErrorCode};
use crate::model::{CaseModel, KeywordType, LoopKind, StepDefinition};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Load and validate a scenario file.
pub fn load_case(path: impl AsRef<Path>) -> Result<CaseModel, EngineError> {
    let path = path.as_ref();
    info!("loading case from {}", path.display());
    if !path.exists() {
        return Err(EngineError::new(
            ErrorCode::FileNotFound,
            format!("case file not found: {}", path.display()),
        ));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EngineError::new(
            ErrorCode::FileNotFound,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;
    parse_case_str(&raw)
}

/// Parse and validate a scenario from a YAML string.
pub fn parse_case_str(raw: &str) -> Result<CaseModel, EngineError> {
    let doc: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| {
        EngineError::new(ErrorCode::YamlParseError, format!("invalid YAML: {e}"))
            .with_detail(e.to_string())
    })?;
    if doc.is_null() {
        return Err(EngineError::new(
            ErrorCode::YamlValidationError,
            "case file is empty",
        ));
    }
    let mut case: CaseModel = serde_yaml::from_value(doc).map_err(|e| {
        EngineError::new(
            ErrorCode::YamlValidationError,
            format!("schema validation failed: {e}"),
        )
        .with_detail(e.to_string())
    })?;

    assign_indices(&mut case.teststeps);
    validate_case(&case)?;
    debug!("loaded case '{}'", case.config.name);
    Ok(case)
}

fn assign_indices(steps: &mut [StepDefinition]) {
    for (i, step) in steps.iter_mut().enumerate() {
        step.index = i;
        assign_indices(&mut step.setup);
        assign_indices(&mut step.teardown);
        if let Some(params) = step.loop_params.as_mut() {
            assign_indices(&mut params.steps);
        }
        if let Some(params) = step.concurrent.as_mut() {
            assign_indices(&mut params.steps);
        }
    }
}

/// Structural invariants serde cannot express.
pub fn validate_case(case: &CaseModel) -> Result<(), EngineError> {
    if case.config.name.trim().is_empty() {
        return Err(invalid("config.name", "must not be empty"));
    }

    if case.ddts.is_some() && case.config.csv_datasource.is_some() {
        return Err(invalid(
            "ddts",
            "ddts and config.csv_datasource are mutually exclusive",
        ));
    }
    if let Some(ddts) = &case.ddts {
        if ddts.parameters.is_empty() {
            return Err(invalid("ddts.parameters", "must not be empty"));
        }
        let first_keys: BTreeSet<&String> = ddts.parameters[0].keys().collect();
        for (i, row) in ddts.parameters.iter().enumerate().skip(1) {
            let keys: BTreeSet<&String> = row.keys().collect();
            if keys != first_keys {
                return Err(invalid(
                    &format!("ddts.parameters[{i}]"),
                    "every parameter row must carry the same key set",
                ));
            }
        }
    }

    validate_steps(&case.teststeps, "teststeps")?;
    Ok(())
}

fn validate_steps(steps: &[StepDefinition], path: &str) -> Result<(), EngineError> {
    let mut seen_names: Vec<&str> = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let step_path = format!("{path}[{i}]");
        validate_step(step, &step_path, &seen_names)?;
        seen_names.push(step.name.as_str());
    }
    Ok(())
}

fn validate_step(
    step: &StepDefinition,
    path: &str,
    earlier_names: &[&str],
) -> Result<(), EngineError> {
    if step.name.trim().is_empty() {
        return Err(invalid(&format!("{path}.name"), "must not be empty"));
    }

    for dep in &step.depends_on {
        if !earlier_names.contains(&dep.as_str()) {
            return Err(invalid(
                &format!("{path}.depends_on"),
                &format!("'{dep}' does not name an earlier step"),
            ));
        }
    }

    match step.keyword_type {
        KeywordType::Request => {
            let req = step.request.as_ref().ok_or_else(|| {
                invalid(&format!("{path}.request"), "required for request steps")
            })?;
            if req.body_field_count() > 1 {
                return Err(invalid(
                    &format!("{path}.request.body"),
                    "json, data, files and raw are mutually exclusive",
                ));
            }
            if req.timeout == 0 {
                return Err(invalid(
                    &format!("{path}.request.timeout"),
                    "must be at least 1 second",
                ));
            }
        }
        KeywordType::Assertion => {
            if step.assertion.is_none() {
                return Err(invalid(
                    &format!("{path}.assertion"),
                    "required for assertion steps",
                ));
            }
        }
        KeywordType::Extract => {
            if step.extract.as_ref().map_or(true, |rules| rules.is_empty()) {
                return Err(invalid(
                    &format!("{path}.extract"),
                    "at least one rule is required for extract steps",
                ));
            }
        }
        KeywordType::Db => {
            if step.db.is_none() {
                return Err(invalid(&format!("{path}.db"), "required for db steps"));
            }
        }
        KeywordType::Custom => {
            if step.keyword_name.trim().is_empty() {
                return Err(invalid(
                    &format!("{path}.keyword_name"),
                    "required for custom steps",
                ));
            }
        }
        KeywordType::Wait => {
            let wait = step
                .wait
                .as_ref()
                .ok_or_else(|| invalid(&format!("{path}.wait"), "required for wait steps"))?;
            if !wait.seconds.is_finite() || wait.seconds < 0.0 {
                return Err(invalid(
                    &format!("{path}.wait.seconds"),
                    "must be a non-negative number",
                ));
            }
        }
        KeywordType::Loop => {
            let params = step.loop_params.as_ref().ok_or_else(|| {
                invalid(&format!("{path}.loop"), "required for loop steps")
            })?;
            match params.kind {
                LoopKind::For => {
                    if params.items.is_none() {
                        return Err(invalid(
                            &format!("{path}.loop.items"),
                            "required for for-loops",
                        ));
                    }
                }
                LoopKind::While => {
                    if params.condition.as_deref().map_or(true, str::is_empty) {
                        return Err(invalid(
                            &format!("{path}.loop.condition"),
                            "required for while-loops",
                        ));
                    }
                }
            }
            if params.steps.is_empty() {
                return Err(invalid(&format!("{path}.loop.steps"), "must not be empty"));
            }
            validate_steps(&params.steps, &format!("{path}.loop.steps"))?;
        }
        KeywordType::Concurrent => {
            let params = step.concurrent.as_ref().ok_or_else(|| {
                invalid(&format!("{path}.concurrent"), "required for concurrent steps")
            })?;
            if params.concurrency == 0 {
                return Err(invalid(
                    &format!("{path}.concurrent.concurrency"),
                    "must be at least 1",
                ));
            }
            if params.steps.is_empty() {
                return Err(invalid(
                    &format!("{path}.concurrent.steps"),
                    "must not be empty",
                ));
            }
            validate_steps(&params.steps, &format!("{path}.concurrent.steps"))?;
        }
    }

    if step.poll_config.is_some() && step.keyword_type != KeywordType::Request {
        return Err(invalid(
            &format!("{path}.poll_config"),
            "only request steps can poll",
        ));
    }

    validate_steps(&step.setup, &format!("{path}.setup"))?;
    validate_steps(&step.teardown, &format!("{path}.teardown"))?;
    Ok(())
}

fn invalid(path: &str, reason: &str) -> EngineError {
    EngineError::new(
        ErrorCode::YamlValidationError,
        format!("{path}: {reason}"),
    )
}

/// Recursively collect `*.yaml` / `*.yml` files under a directory,
/// sorted by path for stable run order.
pub fn collect_case_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, EngineError> {
    let mut files = Vec::new();
    walk(dir, &mut files).map_err(|e| {
        EngineError::new(
            ErrorCode::FileNotFound,
            format!("failed to read directory {}: {e}", dir.display()),
        )
    })?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}
