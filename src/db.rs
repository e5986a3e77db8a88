//! Database step execution through named adapters.
//!
//! The engine does not ship concrete drivers; callers register a
//! [`DbAdapter`] per datasource name. Query results are normalized to
//! an ordered list of column-name maps so the JSONPath evaluator and
//! the `db_result` assertion target work over them uniformly.

use crate::error::{EngineError, ErrorCode};
use crate::model::DbParams;
use crate::report::DbDetail;
use crate::template::Renderer;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Rows come back as one map per row, column name to cell value, in
/// result-set order.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Value>>,
}

/// Driver seam. Implementations own pooling and thread safety.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryOutput, EngineError>;
}

/// Adapter registry keyed by datasource name, plus the token denylist
/// applied to rendered SQL.
pub struct DbAdapterRegistry {
    adapters: HashMap<String, Arc<dyn DbAdapter>>,
    denylist: Vec<String>,
}

impl Default for DbAdapterRegistry {
    fn default() -> Self {
        Self {
            adapters: HashMap::new(),
            // Comment tokens smuggle trailing clauses past the
            // adapter even without a second statement.
            denylist: vec!["--".to_string(), "/*".to_string()],
        }
    }
}

impl DbAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn DbAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn with_denylist(mut self, tokens: Vec<String>) -> Self {
        self.denylist = tokens;
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DbAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Reject rendered SQL carrying stacked statements or denylisted
    /// tokens (comment markers by default). Variable content must not
    /// be able to smuggle a comment or a second statement past the
    /// adapter.
    pub fn screen_sql(&self, sql: &str) -> Result<(), EngineError> {
        let lowered = sql.to_lowercase();
        for token in &self.denylist {
            if lowered.contains(&token.to_lowercase()) {
                return Err(EngineError::new(
                    ErrorCode::DbQueryError,
                    format!("sql rejected: contains denylisted token '{token}'"),
                ));
            }
        }
        if let Some(pos) = sql.find(';') {
            if !sql[pos + 1..].trim().is_empty() {
                return Err(EngineError::new(
                    ErrorCode::DbQueryError,
                    "sql rejected: stacked statements are not allowed",
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DbAdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbAdapterRegistry")
            .field("datasources", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of one DB step: detail for the document, rows for the
/// extractors/validators, error if any.
#[derive(Debug, Clone)]
pub struct DbOutcome {
    pub detail: Option<DbDetail>,
    pub rows: Value,
    pub error: Option<EngineError>,
}

/// Render the SQL, screen it, run it through the named adapter.
/// Failures come back embedded so the scheduler records the step and
/// continues.
pub async fn execute_db(
    params: &DbParams,
    registry: &DbAdapterRegistry,
    renderer: &Renderer,
    variables: &BTreeMap<String, Value>,
) -> DbOutcome {
    let adapter = match registry.get(&params.datasource) {
        Some(adapter) => adapter,
        None => {
            return DbOutcome {
                detail: None,
                rows: Value::Array(Vec::new()),
                error: Some(EngineError::new(
                    ErrorCode::DbDatasourceNotFound,
                    format!("datasource not found: {}", params.datasource),
                )),
            }
        }
    };

    let sql_rendered = match renderer.render_to_string(&params.sql, variables) {
        Ok(sql) => sql,
        Err(e) => {
            return DbOutcome {
                detail: None,
                rows: Value::Array(Vec::new()),
                error: Some(e),
            }
        }
    };

    if let Err(e) = registry.screen_sql(&sql_rendered) {
        return DbOutcome {
            detail: None,
            rows: Value::Array(Vec::new()),
            error: Some(e),
        };
    }

    debug!(datasource = %params.datasource, "executing sql");
    let start = Instant::now();
    match adapter.query(&sql_rendered).await {
        Ok(output) => {
            let execution_time = start.elapsed().as_millis() as u64;
            let rows: Vec<Value> = output
                .rows
                .iter()
                .map(|row| {
                    Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                })
                .collect();
            let rows = Value::Array(rows);
            DbOutcome {
                detail: Some(DbDetail {
                    datasource: params.datasource.clone(),
                    sql: params.sql.clone(),
                    sql_rendered,
                    row_count: output.rows.len(),
                    columns: output.columns,
                    rows: rows.clone(),
                    execution_time,
                }),
                rows,
                error: None,
            }
        }
        Err(e) => {
            let execution_time = start.elapsed().as_millis() as u64;
            DbOutcome {
                detail: Some(DbDetail {
                    datasource: params.datasource.clone(),
                    sql: params.sql.clone(),
                    sql_rendered,
                    execution_time,
                    ..DbDetail::default()
                }),
                rows: Value::Array(Vec::new()),
                error: Some(e),
            }
        }
    }
}
