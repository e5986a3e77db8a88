//! JSONPath evaluation over `serde_json::Value`.
//!
//! Supports `$`, `.field`, `[i]` (negative indices), `[*]`, recursive
//! descent `..field`, filters `[?(@.field <op> literal)]` with `&`/`|`
//! combinators, and trailing post-processor chains such as
//! `$.items.sort().first()`.
//!
//! A path that matches nothing yields [`PathValue::Missing`], which is
//! distinct from matching a JSON `null`; consumers decide between
//! defaults, failures and `is_null` semantics.

use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Result of a path evaluation: nothing, one node, or many nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum PathValue {
    Missing,
    Single(Value),
    Multi(Vec<Value>),
}

impl PathValue {
    /// Collapse to one value: a single match stays scalar, several
    /// matches become an array.
    pub fn into_value(self) -> Option<Value> {
        match self {
            PathValue::Missing => None,
            PathValue::Single(v) => Some(v),
            PathValue::Multi(vs) => Some(Value::Array(vs)),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PathValue::Missing)
    }
}

static FN_CHAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.([a-zA-Z_][a-zA-Z0-9_]*)\(([^()]*)\)\s*$")
        .expect("failed to compile function-chain regex")
});

/// Evaluate `path` against `root`.
///
/// Invalid paths and function misuse degrade to `Missing` rather than
/// erroring; the extractor/validator layers decide what a miss means.
pub fn evaluate(path: &str, root: &Value) -> PathValue {
    if root.is_null() {
        return PathValue::Missing;
    }

    // Peel trailing `.fn(args)` calls; they apply left-to-right over
    // the node set the base path selects.
    let mut base = path.trim().to_string();
    let mut chain: Vec<(String, Vec<String>)> = Vec::new();
    while let Some(caps) = FN_CHAIN_RE.captures(&base) {
        let Some(whole) = caps.get(0) else { break };
        let name = caps[1].to_string();
        let args = parse_fn_args(&caps[2]);
        let end = whole.start();
        chain.push((name, args));
        base.truncate(end);
    }
    chain.reverse();

    let tokens = match parse_tokens(&base) {
        Some(tokens) => tokens,
        None => return PathValue::Missing,
    };

    let mut nodes = vec![root.clone()];
    for token in &tokens {
        nodes = apply_token(token, nodes);
        if nodes.is_empty() {
            break;
        }
    }

    if chain.is_empty() {
        return match nodes.len() {
            0 => PathValue::Missing,
            1 => PathValue::Single(nodes.swap_remove(0)),
            _ => PathValue::Multi(nodes),
        };
    }

    let mut data = match nodes.len() {
        0 => return PathValue::Missing,
        1 => nodes.swap_remove(0),
        _ => Value::Array(nodes),
    };
    for (name, args) in &chain {
        data = match apply_function(name, args, data) {
            Some(v) => v,
            None => return PathValue::Missing,
        };
    }
    PathValue::Single(data)
}

// ── path tokens ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Child(String),
    Index(i64),
    Wildcard,
    Recursive(String),
    Filter(Filter),
}

fn parse_tokens(path: &str) -> Option<Vec<Token>> {
    let s = path.trim();
    let s = s.strip_prefix('$').unwrap_or(s);
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                if chars.get(pos + 1) == Some(&'.') {
                    pos += 2;
                    let name = read_name(&chars, &mut pos);
                    if name.is_empty() {
                        return None;
                    }
                    tokens.push(Token::Recursive(name));
                } else {
                    pos += 1;
                    let name = read_name(&chars, &mut pos);
                    if name.is_empty() {
                        // Trailing dot or `.[...]`: the bracket arm
                        // handles the rest.
                        if pos >= chars.len() || chars[pos] != '[' {
                            return None;
                        }
                    } else if name == "*" {
                        tokens.push(Token::Wildcard);
                    } else {
                        tokens.push(Token::Child(name));
                    }
                }
            }
            '[' => {
                let close = find_close_bracket(&chars, pos)?;
                let inner: String = chars[pos + 1..close].iter().collect();
                let inner = inner.trim();
                if inner == "*" {
                    tokens.push(Token::Wildcard);
                } else if let Some(rest) = inner.strip_prefix('?') {
                    tokens.push(Token::Filter(parse_filter(rest)?));
                } else if (inner.starts_with('\'') && inner.ends_with('\''))
                    || (inner.starts_with('"') && inner.ends_with('"'))
                {
                    tokens.push(Token::Child(inner[1..inner.len() - 1].to_string()));
                } else {
                    tokens.push(Token::Index(inner.parse::<i64>().ok()?));
                }
                pos = close + 1;
            }
            _ => return None,
        }
    }
    Some(tokens)
}

fn read_name(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && chars[*pos] != '.' && chars[*pos] != '[' {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn find_close_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                ']' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn apply_token(token: &Token, nodes: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::new();
    for node in nodes {
        match token {
            Token::Child(name) => {
                if let Value::Object(map) = &node {
                    if let Some(v) = map.get(name) {
                        out.push(v.clone());
                    }
                }
            }
            Token::Index(i) => {
                if let Value::Array(items) = &node {
                    let len = items.len() as i64;
                    let idx = if *i < 0 { len + i } else { *i };
                    if idx >= 0 && idx < len {
                        out.push(items[idx as usize].clone());
                    }
                }
            }
            Token::Wildcard => match &node {
                Value::Array(items) => out.extend(items.iter().cloned()),
                Value::Object(map) => out.extend(map.values().cloned()),
                _ => {}
            },
            Token::Recursive(name) => collect_recursive(&node, name, &mut out),
            Token::Filter(filter) => {
                if let Value::Array(items) = &node {
                    out.extend(items.iter().filter(|v| filter.matches(v)).cloned());
                }
            }
        }
    }
    out
}

fn collect_recursive(node: &Value, name: &str, out: &mut Vec<Value>) {
    match node {
        Value::Object(map) => {
            for (k, v) in map {
                if k == name {
                    out.push(v.clone());
                }
                collect_recursive(v, name, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_recursive(v, name, out);
            }
        }
        _ => {}
    }
}

// ── filters ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    /// Disjunction of conjunctions: `a & b | c` groups as
    /// `(a & b) | (c)`.
    or_groups: Vec<Vec<Comparison>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    path: Vec<String>,
    op: Option<FilterOp>,
    literal: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

fn parse_filter(expr: &str) -> Option<Filter> {
    let expr = expr.trim();
    let expr = expr
        .strip_prefix('(')
        .and_then(|e| e.strip_suffix(')'))
        .unwrap_or(expr);

    let mut or_groups = Vec::new();
    for group in expr.split('|') {
        let mut terms = Vec::new();
        for term in group.split('&') {
            terms.push(parse_comparison(term.trim())?);
        }
        or_groups.push(terms);
    }
    Some(Filter { or_groups })
}

fn parse_comparison(term: &str) -> Option<Comparison> {
    // Two-character operators must be probed first.
    for (text, op) in [
        ("==", FilterOp::Eq),
        ("!=", FilterOp::Ne),
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
    ] {
        if let Some(split) = term.find(text) {
            let lhs = term[..split].trim();
            let rhs = term[split + text.len()..].trim();
            return Some(Comparison {
                path: parse_at_path(lhs)?,
                op: Some(op),
                literal: parse_literal(rhs)?,
            });
        }
    }
    // Bare `@.field` is an existence check.
    Some(Comparison {
        path: parse_at_path(term)?,
        op: None,
        literal: Value::Null,
    })
}

fn parse_at_path(lhs: &str) -> Option<Vec<String>> {
    let rest = lhs.strip_prefix('@')?;
    if rest.is_empty() {
        return Some(Vec::new());
    }
    let rest = rest.strip_prefix('.')?;
    Some(rest.split('.').map(|s| s.trim().to_string()).collect())
}

fn parse_literal(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return Some(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(Value::from(f));
    }
    None
}

impl Filter {
    fn matches(&self, element: &Value) -> bool {
        self.or_groups
            .iter()
            .any(|group| group.iter().all(|cmp| cmp.matches(element)))
    }
}

impl Comparison {
    fn matches(&self, element: &Value) -> bool {
        let mut current = element;
        for part in &self.path {
            match current {
                Value::Object(map) => match map.get(part) {
                    Some(v) => current = v,
                    None => return false,
                },
                _ => return false,
            }
        }
        match self.op {
            None => true,
            Some(FilterOp::Eq) => values_equal(current, &self.literal),
            Some(FilterOp::Ne) => !values_equal(current, &self.literal),
            Some(op) => {
                let (a, b) = match (as_f64(current), as_f64(&self.literal)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return false,
                };
                match op {
                    FilterOp::Gt => a > b,
                    FilterOp::Lt => a < b,
                    FilterOp::Ge => a >= b,
                    FilterOp::Le => a <= b,
                    _ => unreachable!(),
                }
            }
        }
    }
}

/// Structural equality with cross-width numeric comparison
/// (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ── post-processor functions ────────────────────────────────

fn parse_fn_args(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|a| {
            if (a.starts_with('\'') && a.ends_with('\'') && a.len() >= 2)
                || (a.starts_with('"') && a.ends_with('"') && a.len() >= 2)
            {
                a[1..a.len() - 1].to_string()
            } else {
                a.to_string()
            }
        })
        .collect()
}

fn apply_function(name: &str, args: &[String], data: Value) -> Option<Value> {
    match name {
        "length" | "size" | "count" => Some(Value::from(container_len(&data).unwrap_or(1))),
        "first" => match data {
            Value::Array(items) => items.into_iter().next(),
            other => Some(other),
        },
        "last" => match data {
            Value::Array(items) => items.into_iter().last(),
            other => Some(other),
        },
        "sum" | "avg" | "min" | "max" => numeric_fold(name, data),
        "reverse" => Some(match data {
            Value::Array(mut items) => {
                items.reverse();
                Value::Array(items)
            }
            other => other,
        }),
        "sort" => Some(match data {
            Value::Array(mut items) => {
                items.sort_by(cmp_values);
                Value::Array(items)
            }
            other => other,
        }),
        "unique" => Some(match data {
            Value::Array(items) => {
                let mut seen = Vec::new();
                let mut out = Vec::new();
                for item in items {
                    let key = item.to_string();
                    if !seen.contains(&key) {
                        seen.push(key);
                        out.push(item);
                    }
                }
                Value::Array(out)
            }
            other => other,
        }),
        "flatten" => Some(Value::Array(flatten(data))),
        "keys" => Some(match data {
            Value::Object(map) => {
                Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
            }
            _ => Value::Array(Vec::new()),
        }),
        "values" => Some(match data {
            Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
            Value::Array(items) => Value::Array(items),
            other => Value::Array(vec![other]),
        }),
        "upper" => Some(match data {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        }),
        "lower" => Some(match data {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        }),
        "trim" => Some(match data {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        }),
        "split" => {
            let sep = args.first().map(String::as_str).unwrap_or(",");
            match data {
                Value::String(s) => Some(Value::Array(
                    s.split(sep).map(|p| Value::String(p.to_string())).collect(),
                )),
                _ => None,
            }
        }
        "join" => {
            let sep = args.first().map(String::as_str).unwrap_or(",");
            match data {
                Value::Array(items) => Some(Value::String(
                    items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(sep),
                )),
                _ => None,
            }
        }
        "contains" => {
            let needle = args.first()?;
            Some(Value::Bool(match &data {
                Value::String(s) => s.contains(needle.as_str()),
                Value::Array(items) => items.iter().any(|v| match v {
                    Value::String(s) => s == needle,
                    other => other.to_string() == *needle,
                }),
                Value::Object(map) => map.contains_key(needle.as_str()),
                _ => false,
            }))
        }
        "starts_with" => match (&data, args.first()) {
            (Value::String(s), Some(p)) => Some(Value::Bool(s.starts_with(p.as_str()))),
            _ => None,
        },
        "ends_with" => match (&data, args.first()) {
            (Value::String(s), Some(p)) => Some(Value::Bool(s.ends_with(p.as_str()))),
            _ => None,
        },
        "matches" => match (&data, args.first()) {
            (Value::String(s), Some(p)) => {
                let re = Regex::new(p).ok()?;
                Some(Value::Bool(re.is_match(s)))
            }
            _ => None,
        },
        "is_empty" => Some(Value::Bool(container_len(&data).map_or(false, |n| n == 0))),
        "is_null" => Some(Value::Bool(data.is_null())),
        _ => None,
    }
}

fn container_len(v: &Value) -> Option<usize> {
    match v {
        Value::Array(items) => Some(items.len()),
        Value::String(s) => Some(s.chars().count()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn numeric_fold(name: &str, data: Value) -> Option<Value> {
    let items = match data {
        Value::Array(items) => items,
        other => return Some(other),
    };
    if items.is_empty() {
        return None;
    }
    let nums: Option<Vec<f64>> = items.iter().map(as_f64).collect();
    let nums = nums?;
    let folded = match name {
        "sum" => nums.iter().sum(),
        "avg" => nums.iter().sum::<f64>() / nums.len() as f64,
        "min" => nums.iter().cloned().fold(f64::INFINITY, f64::min),
        "max" => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        _ => return None,
    };
    // Keep integral results integral so assertions on counts stay
    // exact.
    if name != "avg" && folded.fract() == 0.0 && folded.abs() < i64::MAX as f64 {
        Some(Value::from(folded as i64))
    } else {
        Number::from_f64(folded).map(Value::Number)
    }
}

fn flatten(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.into_iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "code": 0,
            "data": {
                "users": [
                    {"name": "alice", "age": 30, "active": true},
                    {"name": "bob", "age": 25, "active": false},
                    {"name": "carol", "age": 35, "active": true}
                ],
                "tags": ["b", "a", "b", "c"]
            }
        })
    }

    #[test]
    fn test_simple_child_access() {
        assert_eq!(evaluate("$.code", &sample()), PathValue::Single(json!(0)));
        assert_eq!(
            evaluate("$.data.users[0].name", &sample()),
            PathValue::Single(json!("alice"))
        );
    }

    #[test]
    fn test_negative_index() {
        assert_eq!(
            evaluate("$.data.users[-1].name", &sample()),
            PathValue::Single(json!("carol"))
        );
    }

    #[test]
    fn test_wildcard_collects_all() {
        assert_eq!(
            evaluate("$.data.users[*].name", &sample()),
            PathValue::Multi(vec![json!("alice"), json!("bob"), json!("carol")])
        );
    }

    #[test]
    fn test_recursive_descent() {
        assert_eq!(
            evaluate("$..name", &sample()),
            PathValue::Multi(vec![json!("alice"), json!("bob"), json!("carol")])
        );
    }

    #[test]
    fn test_missing_is_not_null() {
        assert!(evaluate("$.nope", &sample()).is_missing());
        assert!(evaluate("$.data.users[9]", &sample()).is_missing());
        // A literal null node is found, not missing.
        let v = json!({"x": null});
        assert_eq!(evaluate("$.x", &v), PathValue::Single(Value::Null));
    }

    #[test]
    fn test_null_root_is_missing() {
        assert!(evaluate("$", &Value::Null).is_missing());
        assert!(evaluate("$.anything", &Value::Null).is_missing());
    }

    #[test]
    fn test_filter_comparison() {
        assert_eq!(
            evaluate("$.data.users[?(@.age > 28)].name", &sample()),
            PathValue::Multi(vec![json!("alice"), json!("carol")])
        );
        assert_eq!(
            evaluate("$.data.users[?(@.name == 'bob')].age", &sample()),
            PathValue::Single(json!(25))
        );
    }

    #[test]
    fn test_filter_boolean_literal_lowercase() {
        assert_eq!(
            evaluate("$.data.users[?(@.active == true)].name", &sample()),
            PathValue::Multi(vec![json!("alice"), json!("carol")])
        );
    }

    #[test]
    fn test_filter_combinators() {
        assert_eq!(
            evaluate(
                "$.data.users[?(@.age > 28 & @.active == true)].name",
                &sample()
            ),
            PathValue::Multi(vec![json!("alice"), json!("carol")])
        );
        assert_eq!(
            evaluate(
                "$.data.users[?(@.age < 26 | @.age > 34)].name",
                &sample()
            ),
            PathValue::Multi(vec![json!("bob"), json!("carol")])
        );
    }

    #[test]
    fn test_filter_existence() {
        let v = json!({"items": [{"id": 1}, {"name": "x"}]});
        assert_eq!(
            evaluate("$.items[?(@.id)]", &v),
            PathValue::Single(json!({"id": 1}))
        );
    }

    #[test]
    fn test_length_family() {
        assert_eq!(
            evaluate("$.data.users.length()", &sample()),
            PathValue::Single(json!(3))
        );
        assert_eq!(
            evaluate("$.data.users.size()", &sample()),
            PathValue::Single(json!(3))
        );
        assert_eq!(
            evaluate("$.data.users.count()", &sample()),
            PathValue::Single(json!(3))
        );
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(
            evaluate("$.data.users[*].age.sum()", &sample()),
            PathValue::Single(json!(90))
        );
        assert_eq!(
            evaluate("$.data.users[*].age.avg()", &sample()),
            PathValue::Single(json!(30.0))
        );
        assert_eq!(
            evaluate("$.data.users[*].age.min()", &sample()),
            PathValue::Single(json!(25))
        );
        assert_eq!(
            evaluate("$.data.users[*].age.max()", &sample()),
            PathValue::Single(json!(35))
        );
    }

    #[test]
    fn test_sort_unique_and_chaining() {
        assert_eq!(
            evaluate("$.data.tags.sort()", &sample()),
            PathValue::Single(json!(["a", "b", "b", "c"]))
        );
        assert_eq!(
            evaluate("$.data.tags.unique().sort()", &sample()),
            PathValue::Single(json!(["a", "b", "c"]))
        );
        // Chain associativity: f then g equals g applied to f's
        // output.
        let f_then_g = evaluate("$.data.tags.unique().length()", &sample());
        let inner = evaluate("$.data.tags.unique()", &sample())
            .into_value()
            .unwrap();
        let g_of_f = evaluate("$.length()", &inner);
        assert_eq!(f_then_g, g_of_f);
    }

    #[test]
    fn test_string_functions() {
        let v = json!({"s": "  Hello,World  "});
        assert_eq!(
            evaluate("$.s.trim()", &v),
            PathValue::Single(json!("Hello,World"))
        );
        assert_eq!(
            evaluate("$.s.trim().upper()", &v),
            PathValue::Single(json!("HELLO,WORLD"))
        );
        assert_eq!(
            evaluate("$.s.trim().lower().split(',')", &v),
            PathValue::Single(json!(["hello", "world"]))
        );
    }

    #[test]
    fn test_join_and_predicates() {
        let v = json!({"parts": ["a", "b"], "name": "sisyphus"});
        assert_eq!(
            evaluate("$.parts.join('-')", &v),
            PathValue::Single(json!("a-b"))
        );
        assert_eq!(
            evaluate("$.name.starts_with('sis')", &v),
            PathValue::Single(json!(true))
        );
        assert_eq!(
            evaluate("$.name.ends_with('xyz')", &v),
            PathValue::Single(json!(false))
        );
        assert_eq!(
            evaluate("$.name.matches('^s.*s$')", &v),
            PathValue::Single(json!(true))
        );
        assert_eq!(
            evaluate("$.parts.contains('a')", &v),
            PathValue::Single(json!(true))
        );
    }

    #[test]
    fn test_keys_values_flatten() {
        let v = json!({"obj": {"a": 1, "b": 2}, "nested": [[1, 2], [3]]});
        assert_eq!(
            evaluate("$.obj.keys()", &v),
            PathValue::Single(json!(["a", "b"]))
        );
        assert_eq!(
            evaluate("$.obj.values()", &v),
            PathValue::Single(json!([1, 2]))
        );
        assert_eq!(
            evaluate("$.nested.flatten()", &v),
            PathValue::Single(json!([1, 2, 3]))
        );
    }

    #[test]
    fn test_first_last_reverse() {
        let v = json!({"xs": [1, 2, 3]});
        assert_eq!(evaluate("$.xs.first()", &v), PathValue::Single(json!(1)));
        assert_eq!(evaluate("$.xs.last()", &v), PathValue::Single(json!(3)));
        assert_eq!(
            evaluate("$.xs.reverse()", &v),
            PathValue::Single(json!([3, 2, 1]))
        );
        assert!(evaluate("$.xs[9].first()", &v).is_missing());
    }

    #[test]
    fn test_db_rows_shape() {
        // Query results are an array of column-name maps; `$[i].col`
        // addresses a cell.
        let rows = json!([
            {"id": 1, "name": "a"},
            {"id": 2, "name": "b"}
        ]);
        assert_eq!(evaluate("$[0].name", &rows), PathValue::Single(json!("a")));
        assert_eq!(evaluate("$.length()", &rows), PathValue::Single(json!(2)));
    }

    #[test]
    fn test_invalid_path_degrades_to_missing() {
        assert!(evaluate("$.items[abc]", &sample()).is_missing());
        assert!(evaluate("$.items[", &sample()).is_missing());
    }
}
