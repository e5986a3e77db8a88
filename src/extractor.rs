//! Variable extraction: pull values out of responses, headers,
//! cookies and DB rows into the variable pool.
//!
//! A failed extraction never fails its step on its own; it records a
//! failed [`ExtractResult`] unless the rule carries a `default`.

use crate::jsonpath;
use crate::model::{ExtractRule, ExtractSource};
use crate::report::{ExtractResult, ExtractStatus};
use serde_json::Value;
use std::collections::BTreeMap;

/// Case-insensitive header lookup.
pub fn header_value(headers: &Value, name: &str) -> Option<Value> {
    let map = headers.as_object()?;
    let wanted = name.trim().to_lowercase();
    map.iter()
        .find(|(k, _)| k.to_lowercase() == wanted)
        .map(|(_, v)| v.clone())
}

/// Cookie lookup: exact name first, then lowercase.
pub fn cookie_value(cookies: &Value, name: &str) -> Option<Value> {
    let map = cookies.as_object()?;
    let trimmed = name.trim();
    map.get(trimmed)
        .or_else(|| map.get(&trimmed.to_lowercase()))
        .cloned()
}

fn resolve_value(
    rule: &ExtractRule,
    response: Option<&Value>,
    variables: &BTreeMap<String, Value>,
    db_rows: Option<&Value>,
) -> Option<Value> {
    // An explicit source_variable beats the implicit last response,
    // provided the variable holds a response-shaped map.
    let source = match &rule.source_variable {
        Some(name) if !name.trim().is_empty() => match variables.get(name.trim()) {
            Some(v) if v.is_object() => Some(v),
            _ => None,
        },
        _ => response,
    };

    match rule.source {
        ExtractSource::Json => {
            let body = source.and_then(|s| s.get("body"))?;
            if rule.expression.is_empty() {
                return Some(body.clone());
            }
            jsonpath::evaluate(&rule.expression, body).into_value()
        }
        ExtractSource::Header => {
            let headers = source.and_then(|s| s.get("headers"))?;
            header_value(headers, &rule.expression)
        }
        ExtractSource::Cookie => {
            let cookies = source.and_then(|s| s.get("cookies"))?;
            cookie_value(cookies, &rule.expression)
        }
        ExtractSource::DbResult => {
            let rows = db_rows?;
            if rule.expression.is_empty() {
                return Some(rows.clone());
            }
            if rule.expression.trim() == "$.length" {
                return Some(Value::from(rows.as_array().map_or(0, |r| r.len())));
            }
            jsonpath::evaluate(&rule.expression, rows).into_value()
        }
    }
}

/// Apply one extraction rule. A miss with a `default` succeeds with
/// the default; a miss without one records `failed` and no value.
pub fn run_extract(
    rule: &ExtractRule,
    response: Option<&Value>,
    variables: &BTreeMap<String, Value>,
    db_rows: Option<&Value>,
) -> ExtractResult {
    let mut value = resolve_value(rule, response, variables, db_rows);

    if value.is_none() {
        if let Some(default) = &rule.default {
            value = Some(default.clone());
        }
    }

    match value {
        Some(v) => ExtractResult {
            name: rule.name.clone(),
            source: rule.source.as_str().to_string(),
            expression: rule.expression.clone(),
            scope: rule.scope.as_str().to_string(),
            value: v,
            status: ExtractStatus::Success,
        },
        None => ExtractResult {
            name: rule.name.clone(),
            source: rule.source.as_str().to_string(),
            expression: rule.expression.clone(),
            scope: rule.scope.as_str().to_string(),
            value: Value::Null,
            status: ExtractStatus::Failed,
        },
    }
}

/// Apply rules in declared order.
pub fn run_extract_batch(
    rules: &[ExtractRule],
    response: Option<&Value>,
    variables: &BTreeMap<String, Value>,
    db_rows: Option<&Value>,
) -> Vec<ExtractResult> {
    rules
        .iter()
        .map(|rule| run_extract(rule, response, variables, db_rows))
        .collect()
}
