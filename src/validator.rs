//! Assertion engine: resolve the actual value by target, render the
//! expected value, apply the comparator.
//!
//! A failing assertion marks its step `failed` but never aborts the
//! remaining assertions of that step; the scheduler enforces that
//! policy, this module only produces [`AssertionResult`] records.

use crate::extractor::{cookie_value, header_value};
use crate::jsonpath;
use crate::model::{AssertTarget, ValidateRule};
use crate::report::{AssertionResult, Status};
use crate::template::Renderer;
use crate::{comparators, error::EngineError};
use serde_json::Value;
use std::collections::BTreeMap;

fn resolve_actual(
    target: AssertTarget,
    expression: Option<&str>,
    response: Option<&Value>,
    variables: &BTreeMap<String, Value>,
    db_rows: Option<&Value>,
) -> Value {
    match target {
        AssertTarget::Json => {
            let body = response.and_then(|r| r.get("body"));
            match (body, expression) {
                (Some(body), Some(expr)) if !expr.is_empty() => jsonpath::evaluate(expr, body)
                    .into_value()
                    .unwrap_or(Value::Null),
                (Some(body), _) => body.clone(),
                (None, _) => Value::Null,
            }
        }
        AssertTarget::Header => response
            .and_then(|r| r.get("headers"))
            .and_then(|h| header_value(h, expression.unwrap_or_default()))
            .unwrap_or(Value::Null),
        AssertTarget::Cookie => response
            .and_then(|r| r.get("cookies"))
            .and_then(|c| cookie_value(c, expression.unwrap_or_default()))
            .unwrap_or(Value::Null),
        AssertTarget::StatusCode => response
            .and_then(|r| r.get("status_code"))
            .cloned()
            .unwrap_or(Value::Null),
        AssertTarget::ResponseTime => response
            .and_then(|r| r.get("response_time"))
            .cloned()
            .unwrap_or(Value::Null),
        AssertTarget::EnvVariable => expression
            .map(str::trim)
            .and_then(|name| variables.get(name))
            .cloned()
            .unwrap_or(Value::Null),
        AssertTarget::DbResult => match (db_rows, expression) {
            (Some(rows), Some(expr)) if expr.trim() == "$.length" => {
                Value::from(rows.as_array().map_or(0, |r| r.len()))
            }
            (Some(rows), Some(expr)) if !expr.is_empty() => jsonpath::evaluate(expr, rows)
                .into_value()
                .unwrap_or(Value::Null),
            (Some(rows), _) => rows.clone(),
            (None, _) => Value::Null,
        },
    }
}

/// Run one assertion rule and produce its record.
///
/// `expected` passes through the template engine before comparison, so
/// rules may reference extracted or data-driven variables.
pub fn run_assertion(
    rule: &ValidateRule,
    response: Option<&Value>,
    variables: &BTreeMap<String, Value>,
    db_rows: Option<&Value>,
    renderer: &Renderer,
) -> AssertionResult {
    let expected = match renderer.render(&rule.expected, variables) {
        Ok(v) => v,
        Err(e) => return failed_result(rule, rule.expected.clone(), Value::Null, e),
    };
    let actual = resolve_actual(
        rule.target,
        rule.expression.as_deref(),
        response,
        variables,
        db_rows,
    );

    match comparators::compare(&rule.comparator, &actual, &expected) {
        Ok(true) => AssertionResult {
            target: rule.target.as_str().to_string(),
            expression: rule.expression.clone(),
            comparator: rule.comparator.clone(),
            expected,
            actual,
            status: Status::Passed,
            message: None,
        },
        Ok(false) => {
            let message = rule
                .message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "assertion failed: expected {} {expected}, actual {actual}",
                        rule.comparator
                    )
                });
            AssertionResult {
                target: rule.target.as_str().to_string(),
                expression: rule.expression.clone(),
                comparator: rule.comparator.clone(),
                expected,
                actual,
                status: Status::Failed,
                message: Some(message),
            }
        }
        Err(reason) => AssertionResult {
            target: rule.target.as_str().to_string(),
            expression: rule.expression.clone(),
            comparator: rule.comparator.clone(),
            expected,
            actual,
            status: Status::Failed,
            message: Some(reason),
        },
    }
}

fn failed_result(
    rule: &ValidateRule,
    expected: Value,
    actual: Value,
    err: EngineError,
) -> AssertionResult {
    AssertionResult {
        target: rule.target.as_str().to_string(),
        expression: rule.expression.clone(),
        comparator: rule.comparator.clone(),
        expected,
        actual,
        status: Status::Failed,
        message: Some(err.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Providers;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn renderer() -> Renderer {
        Renderer::new(Providers::fixed(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ))
    }

    fn rule(target: AssertTarget, expression: Option<&str>, comparator: &str, expected: Value) -> ValidateRule {
        ValidateRule {
            target,
            expression: expression.map(str::to_string),
            comparator: comparator.to_string(),
            expected,
            message: None,
            source_variable: None,
        }
    }

    fn response() -> Value {
        json!({
            "status_code": 200,
            "headers": {"Content-Type": "application/json"},
            "body": {"code": 0, "items": [1, 2, 3]},
            "cookies": {"sid": "s1"},
            "response_time": 42
        })
    }

    #[test]
    fn test_status_code_assertion() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::StatusCode, None, "eq", json!(200)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
        assert_eq!(r.actual, json!(200));
    }

    #[test]
    fn test_json_path_assertion() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::Json, Some("$.items.length()"), "eq", json!(3)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }

    #[test]
    fn test_failure_produces_default_message() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::StatusCode, None, "eq", json!(201)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Failed);
        let msg = r.message.unwrap();
        assert!(msg.contains("eq"));
        assert!(msg.contains("201"));
    }

    #[test]
    fn test_custom_message_wins() {
        let resp = response();
        let mut failing = rule(AssertTarget::StatusCode, None, "eq", json!(500));
        failing.message = Some("status drifted".to_string());
        let r = run_assertion(&failing, Some(&resp), &BTreeMap::new(), None, &renderer());
        assert_eq!(r.message.as_deref(), Some("status drifted"));
    }

    #[test]
    fn test_expected_is_rendered() {
        let resp = response();
        let vars: BTreeMap<String, Value> = [("want".to_string(), json!(200))].into();
        let r = run_assertion(
            &rule(AssertTarget::StatusCode, None, "eq", json!("{{want}}")),
            Some(&resp),
            &vars,
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
        assert_eq!(r.expected, json!(200));
    }

    #[test]
    fn test_env_variable_reads_merged_view() {
        let vars: BTreeMap<String, Value> = [("token".to_string(), json!("T"))].into();
        let r = run_assertion(
            &rule(AssertTarget::EnvVariable, Some("token"), "eq", json!("T")),
            None,
            &vars,
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }

    #[test]
    fn test_response_time_target() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::ResponseTime, None, "lt", json!(1000)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }

    #[test]
    fn test_db_result_row_count() {
        let rows = json!([{"n": 1}, {"n": 2}]);
        let r = run_assertion(
            &rule(AssertTarget::DbResult, Some("$.length"), "eq", json!(2)),
            None,
            &BTreeMap::new(),
            Some(&rows),
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }

    #[test]
    fn test_header_case_insensitive() {
        let resp = response();
        let r = run_assertion(
            &rule(
                AssertTarget::Header,
                Some("content-type"),
                "contains",
                json!("json"),
            ),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }

    #[test]
    fn test_comparator_error_fails_with_reason() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::Json, Some("$.code"), "no_such_cmp", json!(1)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Failed);
        assert!(r.message.unwrap().contains("unknown comparator"));
    }

    #[test]
    fn test_missing_json_path_surfaces_null_actual() {
        let resp = response();
        let r = run_assertion(
            &rule(AssertTarget::Json, Some("$.absent"), "is_null", json!(null)),
            Some(&resp),
            &BTreeMap::new(),
            None,
            &renderer(),
        );
        assert_eq!(r.status, Status::Passed);
    }
}
