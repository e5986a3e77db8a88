//! `{{expr}}` template rendering.
//!
//! Strings are expanded, maps and lists are walked recursively, other
//! leaves pass through unchanged. An expression that is the entire
//! string keeps the native type of its result; an expression embedded
//! in a longer string is stringified.

use crate::error::{EngineError, ErrorCode};
use crate::providers::Providers;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("failed to compile template regex")
});

/// What to do when an expression references a variable the store does
/// not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingPolicy {
    /// Surface `VARIABLE_NOT_FOUND`.
    Error,
    /// Substitute an empty string (conditions treat missing as falsy).
    Empty,
    /// Leave the `{{...}}` text in place (multi-pass config
    /// resolution).
    Keep,
}

const BUILTIN_NAMES: &[&str] = &[
    "random",
    "random_uuid",
    "timestamp",
    "timestamp_ms",
    "timestamp_us",
    "datetime",
];

/// Template renderer bound to a provider bundle so that clock/random
/// built-ins are replayable in tests.
#[derive(Debug, Clone)]
pub struct Renderer {
    pub providers: Providers,
}

impl Renderer {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    /// Recursively render any value against the merged variable map.
    pub fn render(
        &self,
        value: &Value,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Value, EngineError> {
        self.render_with_policy(value, vars, MissingPolicy::Error)
    }

    /// Render a string template; the result keeps the native type when
    /// the whole string is a single expression.
    pub fn render_str(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Value, EngineError> {
        self.render_string(template, vars, MissingPolicy::Error)
    }

    /// Render to a display string, for URLs, headers and SQL.
    pub fn render_to_string(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<String, EngineError> {
        Ok(stringify(&self.render_str(template, vars)?))
    }

    /// Lenient rendering for condition expressions: a missing
    /// reference becomes an empty string instead of an error.
    pub fn render_condition(&self, template: &str, vars: &BTreeMap<String, Value>) -> String {
        match self.render_string(template, vars, MissingPolicy::Empty) {
            Ok(v) => stringify(&v),
            Err(_) => String::new(),
        }
    }

    /// One multi-pass resolution step for `config.variables`:
    /// unresolved references are kept verbatim so a later pass can
    /// pick them up.
    pub fn render_keep_unresolved(
        &self,
        value: &Value,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Value, EngineError> {
        self.render_with_policy(value, vars, MissingPolicy::Keep)
    }

    fn render_with_policy(
        &self,
        value: &Value,
        vars: &BTreeMap<String, Value>,
        policy: MissingPolicy,
    ) -> Result<Value, EngineError> {
        match value {
            Value::String(s) => self.render_string(s, vars, policy),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    let key = match self.render_string(k, vars, policy)? {
                        Value::String(s) => s,
                        other => stringify(&other),
                    };
                    out.insert(key, self.render_with_policy(v, vars, policy)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|v| self.render_with_policy(v, vars, policy))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
        policy: MissingPolicy,
    ) -> Result<Value, EngineError> {
        let trimmed = template.trim();
        if let Some(m) = TEMPLATE_RE.find(trimmed) {
            // The whole string is one expression: keep the native
            // result type.
            if m.start() == 0 && m.end() == trimmed.len() {
                let expr = TEMPLATE_RE
                    .captures(trimmed)
                    .and_then(|c| c.get(1))
                    .map(|g| g.as_str().trim().to_string())
                    .unwrap_or_default();
                return match self.resolve_expr(&expr, vars) {
                    Ok(v) => Ok(v),
                    Err(e) if e.code == ErrorCode::VariableNotFound => match policy {
                        MissingPolicy::Error => Err(e),
                        MissingPolicy::Empty => Ok(Value::String(String::new())),
                        MissingPolicy::Keep => Ok(Value::String(trimmed.to_string())),
                    },
                    Err(e) => Err(e),
                };
            }
        } else {
            return Ok(Value::String(template.to_string()));
        }

        let mut out = String::new();
        let mut last = 0;
        for caps in TEMPLATE_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            let expr = caps[1].trim();
            out.push_str(&template[last..whole.start()]);
            match self.resolve_expr(expr, vars) {
                Ok(v) => out.push_str(&stringify(&v)),
                Err(e) if e.code == ErrorCode::VariableNotFound => match policy {
                    MissingPolicy::Error => return Err(e),
                    MissingPolicy::Empty => {}
                    MissingPolicy::Keep => out.push_str(whole.as_str()),
                },
                Err(e) => return Err(e),
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(Value::String(out))
    }

    fn resolve_expr(
        &self,
        expr: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Value, EngineError> {
        if expr.contains('(') {
            return self.call_function(expr);
        }
        // Bare built-in name without parens counts as a call.
        if BUILTIN_NAMES.contains(&expr) && !vars.contains_key(expr) {
            return self.call_builtin(expr, &[]);
        }
        // Exact key first, then dotted lookup inside a map-valued
        // variable.
        if let Some(v) = vars.get(expr) {
            return Ok(v.clone());
        }
        if expr.contains('.') {
            let mut parts = expr.split('.');
            let head = parts.next().unwrap_or_default();
            if let Some(root) = vars.get(head) {
                let mut current = root;
                for part in parts {
                    let next = match current {
                        Value::Object(map) => map.get(part),
                        Value::Array(items) => part
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| items.get(i)),
                        _ => None,
                    };
                    match next {
                        Some(v) => current = v,
                        None => {
                            return Err(EngineError::new(
                                ErrorCode::VariableNotFound,
                                format!("variable path not found: {expr}"),
                            ))
                        }
                    }
                }
                return Ok(current.clone());
            }
        }
        Err(EngineError::new(
            ErrorCode::VariableNotFound,
            format!("variable or function not found: {expr}"),
        ))
    }

    fn call_function(&self, expr: &str) -> Result<Value, EngineError> {
        let (name, rest) = expr.split_once('(').unwrap_or((expr, ""));
        let name = name.trim();
        let args_part = rest.trim_end().trim_end_matches(')');
        let args = parse_args(args_part);
        self.call_builtin(name, &args)
    }

    fn call_builtin(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        let clock = &self.providers.clock;
        match name {
            "random" => {
                let n = args
                    .first()
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
                    .max(0) as usize;
                Ok(Value::String(self.providers.entropy.hex(n)))
            }
            "random_uuid" => Ok(Value::String(self.providers.entropy.uuid())),
            "timestamp" => Ok(Value::from(clock.now().timestamp())),
            "timestamp_ms" => Ok(Value::from(clock.now().timestamp_millis())),
            "timestamp_us" => Ok(Value::from(clock.now().timestamp_micros())),
            "datetime" => {
                let fmt = args
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or("%Y-%m-%d %H:%M:%S");
                Ok(Value::String(clock.now().format(fmt).to_string()))
            }
            _ => Err(EngineError::new(
                ErrorCode::VariableNotFound,
                format!("variable or function not found: {name}"),
            )),
        }
    }
}

/// Split a literal argument list on commas; quoted tokens stay
/// strings, unquoted integers become numbers.
fn parse_args(args_part: &str) -> Vec<Value> {
    args_part
        .split(',')
        .map(|raw| raw.trim())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let quoted = (token.starts_with('\'') && token.ends_with('\'')
                || token.starts_with('"') && token.ends_with('"'))
                && token.len() >= 2;
            if quoted {
                Value::String(token[1..token.len() - 1].to_string())
            } else if let Ok(n) = token.parse::<i64>() {
                Value::from(n)
            } else {
                Value::String(token.to_string())
            }
        })
        .collect()
}

/// Embed a rendered value into a surrounding string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use serde_json::json;

    fn renderer() -> Renderer {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Renderer::new(Providers::fixed(at))
    }

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_whole_expression_keeps_native_type() {
        let r = renderer();
        let v = vars(&[("count", json!(3)), ("flag", json!(true))]);
        assert_eq!(r.render_str("{{count}}", &v).unwrap(), json!(3));
        assert_eq!(r.render_str("{{flag}}", &v).unwrap(), json!(true));
    }

    #[test]
    fn test_embedded_expression_is_stringified() {
        let r = renderer();
        let v = vars(&[("token", json!("T")), ("n", json!(2))]);
        assert_eq!(
            r.render_str("Bearer {{token}}", &v).unwrap(),
            json!("Bearer T")
        );
        assert_eq!(r.render_str("page-{{n}}", &v).unwrap(), json!("page-2"));
    }

    #[test]
    fn test_nested_path_lookup() {
        let r = renderer();
        let v = vars(&[("user", json!({"profile": {"id": 42}}))]);
        assert_eq!(r.render_str("{{user.profile.id}}", &v).unwrap(), json!(42));

        let err = r.render_str("{{user.profile.missing}}", &v).unwrap_err();
        assert_eq!(err.code, ErrorCode::VariableNotFound);
    }

    #[test]
    fn test_missing_variable_errors() {
        let r = renderer();
        let err = r.render_str("{{nope}}", &vars(&[])).unwrap_err();
        assert_eq!(err.code, ErrorCode::VariableNotFound);
    }

    #[test]
    fn test_condition_rendering_is_lenient() {
        let r = renderer();
        assert_eq!(r.render_condition("{{nope}}", &vars(&[])), "");
        assert_eq!(
            r.render_condition("{{x}} == 1", &vars(&[("x", json!(1))])),
            "1 == 1"
        );
    }

    #[test]
    fn test_recursive_rendering() {
        let r = renderer();
        let v = vars(&[("id", json!(7))]);
        let input = json!({
            "url": "/users/{{id}}",
            "ids": ["{{id}}", 1],
            "depth": {"inner": "{{id}}"}
        });
        let out = r.render(&input, &v).unwrap();
        assert_eq!(
            out,
            json!({"url": "/users/7", "ids": [7, 1], "depth": {"inner": 7}})
        );
    }

    #[test]
    fn test_builtin_random() {
        let r = renderer();
        let out = r.render_str("{{random(8)}}", &vars(&[])).unwrap();
        assert_eq!(out.as_str().unwrap().len(), 8);
        // random(0) is the empty string.
        assert_eq!(r.render_str("{{random(0)}}", &vars(&[])).unwrap(), json!(""));
    }

    #[test]
    fn test_builtin_timestamps_fixed_clock() {
        let r = renderer();
        let secs = r.render_str("{{timestamp()}}", &vars(&[])).unwrap();
        let ms = r.render_str("{{timestamp_ms()}}", &vars(&[])).unwrap();
        let us = r.render_str("{{timestamp_us()}}", &vars(&[])).unwrap();
        assert_eq!(secs.as_i64().unwrap() * 1000, ms.as_i64().unwrap());
        assert_eq!(ms.as_i64().unwrap() * 1000, us.as_i64().unwrap());
    }

    #[test]
    fn test_builtin_without_parens() {
        let r = renderer();
        let out = r.render_str("{{random_uuid}}", &vars(&[])).unwrap();
        assert_eq!(out, json!("00000000-0000-4000-8000-000000000000"));
        // A variable of the same name shadows the built-in.
        let v = vars(&[("random_uuid", json!("shadowed"))]);
        assert_eq!(r.render_str("{{random_uuid}}", &v).unwrap(), json!("shadowed"));
    }

    #[test]
    fn test_builtin_datetime_format() {
        let r = renderer();
        let out = r.render_str("{{datetime(%Y-%m-%d)}}", &vars(&[])).unwrap();
        assert_eq!(out, json!("2024-05-01"));
    }

    #[test]
    fn test_render_idempotence_on_static_values() {
        let r = renderer();
        let v = vars(&[("a", json!("x"))]);
        let once = r.render_str("prefix {{a}} suffix", &v).unwrap();
        let twice = r.render_str(once.as_str().unwrap(), &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_keep_unresolved_policy() {
        let r = renderer();
        let v = vars(&[("known", json!("k"))]);
        let out = r
            .render_keep_unresolved(&json!("{{known}}-{{later}}"), &v)
            .unwrap();
        assert_eq!(out, json!("k-{{later}}"));
    }

    #[test]
    fn test_non_string_leaves_pass_through() {
        let r = renderer();
        let input = json!({"n": 1, "b": false, "nil": null});
        assert_eq!(r.render(&input, &vars(&[])).unwrap(), input);
    }
}
