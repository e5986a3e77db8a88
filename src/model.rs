//! Scenario model: the typed schema a YAML case file deserializes into.
//!
//! Entities are immutable after loading; the loader (`crate::loader`)
//! performs the structural validation that serde cannot express.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A complete scenario file: config, ordered steps, optional inline
/// data-driven parameter sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseModel {
    pub config: Config,
    #[serde(default)]
    pub teststeps: Vec<StepDefinition>,
    #[serde(default)]
    pub ddts: Option<Ddts>,
}

/// Case-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scenario_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Case variables; values may reference each other and the
    /// environment with nested `{{...}}` expressions.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub pre_sql: Option<SqlBlock>,
    #[serde(default)]
    pub post_sql: Option<SqlBlock>,
    /// CSV data-driven source; mutually exclusive with `ddts`.
    #[serde(default)]
    pub csv_datasource: Option<String>,
    /// Overall case deadline in seconds. Once exceeded the scheduler
    /// stops launching steps and the case ends with `TIMEOUT_ERROR`.
    #[serde(default)]
    pub case_timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

/// Target environment: base URL plus environment-scoped variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

/// A named datasource plus an ordered list of SQL statements, used by
/// `pre_sql` / `post_sql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlBlock {
    pub datasource: String,
    #[serde(default)]
    pub statements: Vec<String>,
}

/// Inline data-driven parameter sets. Every element must carry the
/// same key set; the loader enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ddts {
    #[serde(default = "default_ddts_name")]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<BTreeMap<String, Value>>,
}

fn default_ddts_name() -> String {
    "ddts".to_string()
}

/// One addressable action in a case.
///
/// `keyword_type` discriminates which of the parameter blocks applies;
/// the loader rejects steps whose block does not match the keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub keyword_type: KeywordType,
    #[serde(default)]
    pub keyword_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub skip_if: Option<String>,
    #[serde(default)]
    pub only_if: Option<String>,
    /// Names of earlier steps this one depends on. If any finished
    /// `failed` or `error` this step is skipped.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub setup: Vec<StepDefinition>,
    #[serde(default)]
    pub teardown: Vec<StepDefinition>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Turns a `request` step into a poll: the request repeats until
    /// the condition holds or the deadline is hit.
    #[serde(default)]
    pub poll_config: Option<PollConfig>,
    #[serde(default)]
    pub on_timeout: Option<OnTimeout>,
    #[serde(default)]
    pub request: Option<RequestParams>,
    #[serde(default)]
    pub assertion: Option<ValidateRule>,
    #[serde(default)]
    pub extract: Option<Vec<ExtractRule>>,
    #[serde(default)]
    pub db: Option<DbParams>,
    #[serde(default)]
    pub custom: Option<CustomParams>,
    #[serde(default)]
    pub wait: Option<WaitParams>,
    #[serde(default, rename = "loop")]
    pub loop_params: Option<LoopParams>,
    #[serde(default)]
    pub concurrent: Option<ConcurrentParams>,
    /// 0-based source-order index, assigned by the loader.
    #[serde(skip)]
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordType {
    Request,
    Assertion,
    Extract,
    Db,
    Custom,
    Wait,
    Loop,
    Concurrent,
}

impl KeywordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordType::Request => "request",
            KeywordType::Assertion => "assertion",
            KeywordType::Extract => "extract",
            KeywordType::Db => "db",
            KeywordType::Custom => "custom",
            KeywordType::Wait => "wait",
            KeywordType::Loop => "loop",
            KeywordType::Concurrent => "concurrent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// HTTP request parameters. Exactly one of `json` / `data` / `files` /
/// `raw` may be present; the loader enforces the exclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute URL, or a path joined onto `environment.base_url`.
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// JSON body.
    #[serde(default, rename = "json")]
    pub json_body: Option<Value>,
    /// Form-encoded body.
    #[serde(default)]
    pub data: Option<Value>,
    /// Multipart attachments: field name to object path.
    #[serde(default)]
    pub files: Option<BTreeMap<String, String>>,
    /// Raw string body.
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, Value>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub allow_redirects: bool,
    #[serde(default = "default_true", alias = "verify_ssl")]
    pub verify: bool,
    #[serde(default)]
    pub extract: Vec<ExtractRule>,
    #[serde(default)]
    pub validate: Vec<ValidateRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Json,
    Form,
    Multipart,
    Raw,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::None => "none",
            BodyKind::Json => "json",
            BodyKind::Form => "form",
            BodyKind::Multipart => "multipart",
            BodyKind::Raw => "raw",
        }
    }
}

impl RequestParams {
    /// Which of the mutually-exclusive body fields is carried.
    pub fn body_kind(&self) -> BodyKind {
        if self.json_body.is_some() {
            BodyKind::Json
        } else if self.data.is_some() {
            BodyKind::Form
        } else if self.files.is_some() {
            BodyKind::Multipart
        } else if self.raw.is_some() {
            BodyKind::Raw
        } else {
            BodyKind::None
        }
    }

    /// Number of body fields present; more than one is a load error.
    pub fn body_field_count(&self) -> usize {
        [
            self.json_body.is_some(),
            self.data.is_some(),
            self.files.is_some(),
            self.raw.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }
}

/// Variable extraction rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRule {
    /// Variable name the extracted value is stored under.
    pub name: String,
    #[serde(default, rename = "type")]
    pub source: ExtractSource,
    pub expression: String,
    #[serde(default)]
    pub scope: Scope,
    /// Fallback written when extraction fails; turns the failure into
    /// a success.
    #[serde(default)]
    pub default: Option<Value>,
    /// Pull from a named prior variable instead of the last response.
    #[serde(default)]
    pub source_variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractSource {
    #[default]
    Json,
    Header,
    Cookie,
    DbResult,
}

impl ExtractSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractSource::Json => "json",
            ExtractSource::Header => "header",
            ExtractSource::Cookie => "cookie",
            ExtractSource::DbResult => "db_result",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Environment,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Environment => "environment",
        }
    }
}

/// Assertion rule: compare a target-derived actual value against a
/// templated expected value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRule {
    pub target: AssertTarget,
    #[serde(default)]
    pub expression: Option<String>,
    pub comparator: String,
    #[serde(default)]
    pub expected: Value,
    /// Custom failure message; a default one is generated otherwise.
    #[serde(default)]
    pub message: Option<String>,
    /// For standalone `assertion` steps: assert against a named prior
    /// variable instead of the last response.
    #[serde(default)]
    pub source_variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertTarget {
    Json,
    Header,
    Cookie,
    StatusCode,
    ResponseTime,
    EnvVariable,
    DbResult,
}

impl AssertTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertTarget::Json => "json",
            AssertTarget::Header => "header",
            AssertTarget::Cookie => "cookie",
            AssertTarget::StatusCode => "status_code",
            AssertTarget::ResponseTime => "response_time",
            AssertTarget::EnvVariable => "env_variable",
            AssertTarget::DbResult => "db_result",
        }
    }
}

/// Per-step retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter: bool,
    /// Error kinds to retry; empty means every step error is
    /// retryable.
    #[serde(default)]
    pub retry_on: Vec<String>,
    /// Error kinds that stop retrying even when listed in `retry_on`.
    #[serde(default)]
    pub stop_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Poll loop configuration for async operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub condition: PollCondition,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
    /// Base interval between attempts, milliseconds.
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    /// Overall poll deadline, milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout: u64,
    #[serde(default = "default_poll_backoff")]
    pub backoff: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollCondition {
    #[serde(default, alias = "type")]
    pub kind: PollConditionKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default, alias = "expect")]
    pub expected: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollConditionKind {
    #[default]
    Jsonpath,
    StatusCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnTimeout {
    #[serde(default)]
    pub behavior: TimeoutBehavior,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutBehavior {
    #[default]
    Fail,
    Continue,
}

/// Database step parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbParams {
    pub datasource: String,
    pub sql: String,
    #[serde(default)]
    pub extract: Vec<ExtractRule>,
    #[serde(default)]
    pub validate: Vec<ValidateRule>,
}

/// Custom keyword parameters; values are rendered before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomParams {
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub extract: Vec<ExtractRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitParams {
    pub seconds: f64,
}

/// `for` / `while` loop over an inner step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopParams {
    #[serde(default, alias = "type")]
    pub kind: LoopKind,
    /// `for`: literal list or a `{{variable}}` resolving to one.
    #[serde(default)]
    pub items: Option<Value>,
    /// `while`: predicate re-evaluated before each iteration.
    #[serde(default)]
    pub condition: Option<String>,
    /// Ephemeral variable holding the current element.
    #[serde(default = "default_loop_variable")]
    pub variable: String,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    #[default]
    For,
    While,
}

/// Bounded parallel fan-out over an inner step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentParams {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Number of parallel iterations of the inner sequence.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    pub steps: Vec<StepDefinition>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_poll_timeout() -> u64 {
    60000
}

fn default_poll_backoff() -> RetryStrategy {
    RetryStrategy::Fixed
}

fn default_operator() -> String {
    "eq".to_string()
}

fn default_loop_variable() -> String {
    "item".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_iterations() -> usize {
    1
}

impl CaseModel {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
