//! HTTP request execution: render, send, normalize.
//!
//! Network failures do not bubble as errors; they come back embedded
//! in the [`HttpOutcome`] so the scheduler can record the step,
//! consult the retry policy and keep walking. Only render-stage
//! failures (unresolvable variables) surface as `Err`.

use crate::error::{EngineError, ErrorCode};
use crate::model::{BodyKind, RequestParams};
use crate::report::{RequestDetail, ResponseDetail};
use crate::template::{stringify, Renderer};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Content-addressed object access for multipart attachments. The
/// default implementation reads the local filesystem; deployments with
/// a remote store plug in their own.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, EngineError>;
}

/// Reads attachment bytes from local paths.
#[derive(Debug, Default)]
pub struct LocalObjectStore;

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        tokio::fs::read(path).await.map_err(|e| {
            EngineError::new(
                ErrorCode::RequestConnectionError,
                format!("failed to read attachment {path}: {e}"),
            )
        })
    }
}

/// Normalized result of one HTTP attempt.
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub body_size: usize,
    pub response_time: u64,
    pub cookies: BTreeMap<String, String>,
    pub error: Option<EngineError>,
    pub request: RequestDetail,
}

impl HttpOutcome {
    /// The response-shaped map stored under `last_response` and fed to
    /// extractors/validators.
    pub fn as_variable(&self) -> Value {
        let mut map = Map::new();
        map.insert("status_code".into(), Value::from(self.status_code));
        map.insert(
            "headers".into(),
            Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert("body".into(), self.body.clone());
        map.insert(
            "cookies".into(),
            Value::Object(
                self.cookies
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert("response_time".into(), Value::from(self.response_time));
        Value::Object(map)
    }

    pub fn response_detail(&self) -> ResponseDetail {
        ResponseDetail {
            status_code: self.status_code,
            headers: self.headers.clone(),
            body: self.body.clone(),
            body_size: self.body_size,
            response_time: self.response_time,
            cookies: self.cookies.clone(),
        }
    }

    fn failure(code: ErrorCode, message: String, elapsed: u64, request: RequestDetail) -> Self {
        Self {
            status_code: 0,
            headers: BTreeMap::new(),
            body: Value::Null,
            body_size: 0,
            response_time: elapsed,
            cookies: BTreeMap::new(),
            error: Some(EngineError::new(code, message)),
            request,
        }
    }
}

/// Join a relative path onto the environment base URL with exactly one
/// separator.
pub fn join_url(base_url: &str, url: &str) -> String {
    if url.contains("://") || base_url.is_empty() {
        return url.to_string();
    }
    if url.is_empty() {
        return base_url.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), url.trim_start_matches('/'))
}

/// Parse the response body as JSON when the content type suggests it
/// or the payload looks like JSON; keep it as a string otherwise.
pub fn parse_body(content_type: Option<&str>, text: &str) -> Value {
    let looks_json = content_type.map_or(false, |ct| ct.contains("json"))
        || matches!(text.trim_start().chars().next(), Some('{') | Some('['));
    if looks_json {
        if let Ok(v) = serde_json::from_str::<Value>(text) {
            return v;
        }
    }
    Value::String(text.to_string())
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        out.insert(
            name.to_string(),
            value.to_str().unwrap_or_default().to_string(),
        );
    }
    out
}

/// First `name=value` pair of each Set-Cookie header.
fn collect_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for value in headers.get_all(SET_COOKIE) {
        if let Ok(raw) = value.to_str() {
            if let Some(pair) = raw.split(';').next() {
                if let Some((name, val)) = pair.split_once('=') {
                    out.insert(name.trim().to_string(), val.trim().to_string());
                }
            }
        }
    }
    out
}

fn classify_error(e: &reqwest::Error) -> ErrorCode {
    if e.is_timeout() {
        return ErrorCode::RequestTimeout;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        let text = err.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("ssl") || text.contains("tls") {
            return ErrorCode::RequestSslError;
        }
        source = err.source();
    }
    ErrorCode::RequestConnectionError
}

/// HTTP executor bound to an object store for multipart attachments.
pub struct HttpExecutor {
    pub store: Arc<dyn ObjectStore>,
}

impl HttpExecutor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Render and send one request. `Err` is reserved for failures in
    /// the render stage; transport errors are embedded in the outcome.
    pub async fn execute(
        &self,
        params: &RequestParams,
        base_url: &str,
        renderer: &Renderer,
        variables: &BTreeMap<String, Value>,
    ) -> Result<HttpOutcome, EngineError> {
        let rendered_url = renderer.render_to_string(&params.url, variables)?;
        if !rendered_url.contains("://") && base_url.is_empty() {
            return Err(EngineError::new(
                ErrorCode::RequestConnectionError,
                format!("relative url '{rendered_url}' requires environment.base_url"),
            ));
        }
        let url = join_url(base_url, &rendered_url);

        let mut headers = BTreeMap::new();
        for (name, value) in &params.headers {
            headers.insert(
                name.clone(),
                stringify(&renderer.render(value, variables)?),
            );
        }
        let mut query = Vec::new();
        for (name, value) in &params.params {
            query.push((
                name.clone(),
                stringify(&renderer.render(value, variables)?),
            ));
        }
        let mut cookies = BTreeMap::new();
        for (name, value) in &params.cookies {
            cookies.insert(
                name.clone(),
                stringify(&renderer.render(value, variables)?),
            );
        }

        let body_kind = params.body_kind();
        let json_body = match &params.json_body {
            Some(body) => Some(renderer.render(body, variables)?),
            None => None,
        };
        let form_body = match &params.data {
            Some(data) => Some(renderer.render(data, variables)?),
            None => None,
        };
        let raw_body = match &params.raw {
            Some(raw) => Some(renderer.render_to_string(raw, variables)?),
            None => None,
        };
        let file_parts = match &params.files {
            Some(files) => {
                let mut parts = Vec::new();
                for (field, path) in files {
                    parts.push((field.clone(), renderer.render_to_string(path, variables)?));
                }
                Some(parts)
            }
            None => None,
        };

        let detail_body = match body_kind {
            BodyKind::Json => json_body.clone(),
            BodyKind::Form => form_body.clone(),
            BodyKind::Raw => raw_body.clone().map(Value::String),
            BodyKind::Multipart => file_parts.as_ref().map(|parts| {
                Value::Object(
                    parts
                        .iter()
                        .map(|(field, path)| (field.clone(), Value::String(path.clone())))
                        .collect(),
                )
            }),
            BodyKind::None => None,
        };
        let request_detail = RequestDetail {
            method: params.method.as_str().to_string(),
            url: url.clone(),
            headers: headers.clone(),
            params: if query.is_empty() {
                None
            } else {
                Some(Value::Object(
                    query
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ))
            },
            body: detail_body,
            body_type: body_kind.as_str().to_string(),
            timeout: params.timeout,
            allow_redirects: params.allow_redirects,
            verify_ssl: params.verify,
        };

        let redirect = if params.allow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(params.timeout))
            .danger_accept_invalid_certs(!params.verify)
            .redirect(redirect)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build http client: {e}")))?;

        let method = reqwest::Method::from_bytes(params.method.as_str().as_bytes())
            .map_err(|e| EngineError::internal(format!("invalid http method: {e}")))?;
        let mut builder = client.request(method, &url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(COOKIE, header);
        }

        match body_kind {
            BodyKind::Json => {
                if let Some(body) = &json_body {
                    builder = builder.json(body);
                }
            }
            BodyKind::Form => {
                let mut form = BTreeMap::new();
                if let Some(Value::Object(map)) = &form_body {
                    for (k, v) in map {
                        form.insert(k.clone(), stringify(v));
                    }
                }
                builder = builder.form(&form);
            }
            BodyKind::Raw => {
                if let Some(raw) = raw_body.clone() {
                    builder = builder.body(raw);
                }
            }
            BodyKind::Multipart => {
                let mut form = reqwest::multipart::Form::new();
                for (field, path) in file_parts.as_deref().unwrap_or_default() {
                    let bytes = self.store.fetch(path).await?;
                    let file_name = path
                        .rsplit(['/', '\\'])
                        .next()
                        .unwrap_or("attachment")
                        .to_string();
                    form = form.part(
                        field.clone(),
                        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                    );
                }
                builder = builder.multipart(form);
            }
            BodyKind::None => {}
        }

        debug!(url = %url, method = %params.method.as_str(), "sending request");
        let start = Instant::now();
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return Ok(HttpOutcome::failure(
                    classify_error(&e),
                    e.to_string(),
                    elapsed,
                    request_detail,
                ));
            }
        };

        let status_code = response.status().as_u16();
        let response_headers = collect_headers(response.headers());
        let response_cookies = collect_cookies(response.headers());
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return Ok(HttpOutcome::failure(
                    classify_error(&e),
                    e.to_string(),
                    elapsed,
                    request_detail,
                ));
            }
        };
        let response_time = start.elapsed().as_millis() as u64;
        debug!(status = status_code, ms = response_time, "received response");

        let text = String::from_utf8_lossy(&bytes);
        let content_type = response_headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == "content-type")
            .map(|(_, v)| v.as_str());
        let body = parse_body(content_type, &text);

        Ok(HttpOutcome {
            status_code,
            headers: response_headers,
            body,
            body_size: bytes.len(),
            response_time,
            cookies: response_cookies,
            error: None,
            request: request_detail,
        })
    }
}
