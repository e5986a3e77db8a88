//! The 17 named assertion comparators.
//!
//! All comparators take `(actual, expected)` as JSON values and return
//! a boolean verdict; operand type mismatches that make a comparison
//! meaningless (ordering over non-numbers, bad regexes, unknown
//! comparator names) are reported as errors so the assertion fails
//! with a reason instead of silently passing.

use crate::jsonpath::values_equal;
use regex::Regex;
use serde_json::Value;

/// Resolve aliases to canonical comparator names.
pub fn canonical_name(name: &str) -> &str {
    match name {
        "ne" => "neq",
        "ge" => "gte",
        "le" => "lte",
        "in" => "contains",
        "not_in" => "not_contains",
        other => other,
    }
}

/// Apply the named comparator. `Err` carries a human-readable reason
/// and counts as a failed assertion.
pub fn compare(name: &str, actual: &Value, expected: &Value) -> Result<bool, String> {
    match canonical_name(name) {
        "eq" => Ok(eq(actual, expected)),
        "neq" => Ok(!eq(actual, expected)),
        "gt" => ordering(actual, expected).map(|o| o == std::cmp::Ordering::Greater),
        "gte" => ordering(actual, expected).map(|o| o != std::cmp::Ordering::Less),
        "lt" => ordering(actual, expected).map(|o| o == std::cmp::Ordering::Less),
        "lte" => ordering(actual, expected).map(|o| o != std::cmp::Ordering::Greater),
        "contains" => contains(actual, expected),
        "not_contains" => contains(actual, expected).map(|b| !b),
        "startswith" => Ok(text(actual).starts_with(&text(expected))),
        "endswith" => Ok(text(actual).ends_with(&text(expected))),
        "matches" => matches(actual, expected),
        "type_match" => type_match(actual, expected),
        "length_eq" => length_cmp(actual, expected).map(|o| o == std::cmp::Ordering::Equal),
        "length_gt" => length_cmp(actual, expected).map(|o| o == std::cmp::Ordering::Greater),
        "length_lt" => length_cmp(actual, expected).map(|o| o == std::cmp::Ordering::Less),
        "is_null" => Ok(is_null(actual)),
        "is_not_null" => Ok(!is_null(actual)),
        other => Err(format!("unknown comparator: {other}")),
    }
}

/// Structural equality; numbers compare numerically across
/// integer/float representations, strings exactly.
fn eq(actual: &Value, expected: &Value) -> bool {
    values_equal(actual, expected)
}

fn ordering(actual: &Value, expected: &Value) -> Result<std::cmp::Ordering, String> {
    let a = as_number(actual)
        .ok_or_else(|| format!("not numerically comparable: {actual}"))?;
    let b = as_number(expected)
        .ok_or_else(|| format!("not numerically comparable: {expected}"))?;
    a.partial_cmp(&b)
        .ok_or_else(|| "not numerically comparable: NaN".to_string())
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Strings: substring. Sequences: element membership. Maps: key
/// membership.
fn contains(actual: &Value, expected: &Value) -> Result<bool, String> {
    match actual {
        Value::String(s) => Ok(s.contains(&text(expected))),
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, expected))),
        Value::Object(map) => Ok(map.contains_key(&text(expected))),
        other => Err(format!("contains is not applicable to {other}")),
    }
}

/// Regex match. Patterns anchored with `^...$` demand a full match;
/// unanchored patterns search anywhere in the stringified actual.
fn matches(actual: &Value, expected: &Value) -> Result<bool, String> {
    let pattern = match expected {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let haystack = text(actual);
    let re = Regex::new(&pattern).map_err(|e| format!("invalid regex: {e}"))?;
    if pattern.starts_with('^') && pattern.ends_with('$') {
        Ok(re
            .find(&haystack)
            .map_or(false, |m| m.start() == 0 && m.end() == haystack.len()))
    } else {
        Ok(re.is_match(&haystack))
    }
}

fn type_match(actual: &Value, expected: &Value) -> Result<bool, String> {
    let name = text(expected).trim().to_lowercase();
    match name.as_str() {
        "int" => Ok(matches!(actual, Value::Number(n) if n.is_i64() || n.is_u64())),
        "str" => Ok(actual.is_string()),
        "list" => Ok(actual.is_array()),
        "dict" => Ok(actual.is_object()),
        "bool" => Ok(actual.is_boolean()),
        "null" => Ok(actual.is_null()),
        other => Err(format!("unknown type name: {other}")),
    }
}

fn length_cmp(actual: &Value, expected: &Value) -> Result<std::cmp::Ordering, String> {
    let len = match actual {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => return Err(format!("length is not applicable to {other}")),
    };
    let expected_len = match expected {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("invalid length operand: {expected}"))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid length operand: {s}"))?,
        other => return Err(format!("invalid length operand: {other}")),
    };
    Ok((len as i64).cmp(&expected_len))
}

/// Null, empty strings and empty containers all count as null.
fn is_null(actual: &Value) -> bool {
    match actual {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(name: &str, a: Value, b: Value) -> bool {
        compare(name, &a, &b).unwrap()
    }

    #[test]
    fn test_eq_numeric_cross_width() {
        assert!(ok("eq", json!(1), json!(1.0)));
        assert!(ok("eq", json!("a"), json!("a")));
        assert!(!ok("eq", json!("1"), json!(1)));
        assert!(ok("eq", json!(null), json!(null)));
        assert!(!ok("eq", json!(null), json!(0)));
    }

    #[test]
    fn test_eq_symmetry_and_neq_complement() {
        let pairs = [
            (json!(1), json!(1.0)),
            (json!("x"), json!("y")),
            (json!([1, 2]), json!([1, 2])),
            (json!({"a": 1}), json!({"a": 2})),
        ];
        for (a, b) in pairs {
            assert_eq!(ok("eq", a.clone(), b.clone()), ok("eq", b.clone(), a.clone()));
            assert_eq!(ok("neq", a.clone(), b.clone()), !ok("eq", a, b));
        }
    }

    #[test]
    fn test_ordering() {
        assert!(ok("gt", json!(2), json!(1)));
        assert!(ok("gte", json!(2), json!(2)));
        assert!(ok("lt", json!(1), json!(2)));
        assert!(ok("lte", json!(2), json!(2)));
        // Numeric strings coerce, matching the template engine's
        // habit of stringifying scalars.
        assert!(ok("gt", json!("10"), json!(9)));
    }

    #[test]
    fn test_ordering_non_numeric_is_error() {
        assert!(compare("gt", &json!("abc"), &json!(1)).is_err());
        assert!(compare("lte", &json!([1]), &json!(1)).is_err());
    }

    #[test]
    fn test_contains_variants() {
        assert!(ok("contains", json!("hello world"), json!("lo w")));
        assert!(ok("contains", json!([1, 2, 3]), json!(2)));
        assert!(ok("contains", json!({"k": 1}), json!("k")));
        assert!(!ok("contains", json!([1, 2]), json!(9)));
        assert!(ok("not_contains", json!("abc"), json!("z")));
    }

    #[test]
    fn test_prefix_suffix() {
        assert!(ok("startswith", json!("sisyphus"), json!("sis")));
        assert!(ok("endswith", json!("sisyphus"), json!("hus")));
        assert!(!ok("startswith", json!("sisyphus"), json!("hus")));
    }

    #[test]
    fn test_matches_anchored_vs_search() {
        // Unanchored: substring search.
        assert!(ok("matches", json!("xx-abc-yy"), json!("abc")));
        // Anchored: the whole value must match.
        assert!(ok("matches", json!("abc"), json!("^abc$")));
        assert!(!ok("matches", json!("xx-abc-yy"), json!("^abc$")));
        // Non-string actuals are stringified first.
        assert!(ok("matches", json!(12345), json!(r"^\d+$")));
    }

    #[test]
    fn test_matches_invalid_regex_is_error() {
        assert!(compare("matches", &json!("a"), &json!("[unclosed")).is_err());
    }

    #[test]
    fn test_type_match() {
        assert!(ok("type_match", json!(1), json!("int")));
        assert!(!ok("type_match", json!(1.5), json!("int")));
        assert!(ok("type_match", json!("s"), json!("str")));
        assert!(ok("type_match", json!([1]), json!("list")));
        assert!(ok("type_match", json!({}), json!("dict")));
        assert!(ok("type_match", json!(true), json!("bool")));
        assert!(ok("type_match", json!(null), json!("null")));
    }

    #[test]
    fn test_length_comparators() {
        assert!(ok("length_eq", json!("abc"), json!(3)));
        assert!(ok("length_eq", json!([1, 2]), json!(2)));
        assert!(ok("length_eq", json!({"a": 1}), json!(1)));
        assert!(ok("length_gt", json!([1, 2, 3]), json!(2)));
        assert!(ok("length_lt", json!("ab"), json!(3)));
        assert!(compare("length_eq", &json!(5), &json!(1)).is_err());
    }

    #[test]
    fn test_null_checks_ignore_expected() {
        assert!(ok("is_null", json!(null), json!("whatever")));
        assert!(ok("is_null", json!(""), json!(null)));
        assert!(ok("is_null", json!([]), json!(null)));
        assert!(ok("is_not_null", json!("x"), json!(null)));
        assert!(ok("is_not_null", json!(0), json!(null)));
    }

    #[test]
    fn test_aliases_accepted() {
        assert!(ok("ge", json!(2), json!(2)));
        assert!(ok("le", json!(2), json!(2)));
        assert!(ok("ne", json!(1), json!(2)));
        assert!(ok("in", json!([1, 2]), json!(1)));
        assert!(ok("not_in", json!([1, 2]), json!(3)));
    }

    #[test]
    fn test_unknown_comparator_is_error() {
        assert!(compare("almost_eq", &json!(1), &json!(1)).is_err());
    }
}
