//! Custom keyword dispatch.
//!
//! Keywords are registered by name; a `custom` step renders its
//! parameters, invokes the keyword and exposes the return value as the
//! body for inline extraction.

use crate::error::{EngineError, ErrorCode};
use crate::model::CustomParams;
use crate::report::CustomDetail;
use crate::template::Renderer;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// A user-supplied keyword implementation.
#[async_trait]
pub trait Keyword: Send + Sync {
    async fn execute(&self, parameters: &BTreeMap<String, Value>) -> anyhow::Result<Value>;
}

#[derive(Default)]
pub struct KeywordRegistry {
    keywords: HashMap<String, Arc<dyn Keyword>>,
}

impl KeywordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, keyword: Arc<dyn Keyword>) {
        self.keywords.insert(name.into(), keyword);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Keyword>> {
        self.keywords.get(name).cloned()
    }
}

impl std::fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("keywords", &self.keywords.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CustomOutcome {
    pub detail: Option<CustomDetail>,
    pub return_value: Value,
    pub error: Option<EngineError>,
}

/// Look up and run a keyword. Unknown names map to
/// `KEYWORD_NOT_FOUND`, panics-equivalent execution failures to
/// `KEYWORD_EXECUTION_ERROR`.
pub async fn execute_custom(
    keyword_name: &str,
    params: &CustomParams,
    registry: &KeywordRegistry,
    renderer: &Renderer,
    variables: &BTreeMap<String, Value>,
) -> CustomOutcome {
    let mut rendered = BTreeMap::new();
    for (key, value) in &params.parameters {
        match renderer.render(value, variables) {
            Ok(v) => {
                rendered.insert(key.clone(), v);
            }
            Err(e) => {
                return CustomOutcome {
                    detail: None,
                    return_value: Value::Null,
                    error: Some(e),
                }
            }
        }
    }

    let keyword = match registry.get(keyword_name) {
        Some(k) => k,
        None => {
            return CustomOutcome {
                detail: None,
                return_value: Value::Null,
                error: Some(EngineError::new(
                    ErrorCode::KeywordNotFound,
                    format!("keyword not found: {keyword_name}"),
                )),
            }
        }
    };

    let start = Instant::now();
    match keyword.execute(&rendered).await {
        Ok(return_value) => {
            let execution_time = start.elapsed().as_millis() as u64;
            CustomOutcome {
                detail: Some(CustomDetail {
                    keyword_name: keyword_name.to_string(),
                    parameters_input: rendered,
                    return_value: return_value.clone(),
                    execution_time,
                }),
                return_value,
                error: None,
            }
        }
        Err(e) => {
            let execution_time = start.elapsed().as_millis() as u64;
            CustomOutcome {
                detail: Some(CustomDetail {
                    keyword_name: keyword_name.to_string(),
                    parameters_input: rendered,
                    return_value: Value::Null,
                    execution_time,
                }),
                return_value: Value::Null,
                error: Some(EngineError::new(
                    ErrorCode::KeywordExecutionError,
                    e.to_string(),
                )),
            }
        }
    }
}
