//! Step scheduler and case execution.
//!
//! The top-level scheduler walks `teststeps` in index order and does
//! not progress until the current step completes; parallelism exists
//! only inside `concurrent` steps (bounded fan-out) and across
//! data-driven rows. Step errors are recorded and the walk continues;
//! engine errors abort the case.

use crate::custom::{execute_custom, KeywordRegistry};
use crate::data_driven;
use crate::db::{execute_db, DbAdapterRegistry, DbOutcome};
use crate::error::{EngineError, ErrorCode};
use crate::extractor::run_extract_batch;
use crate::http::{HttpExecutor, HttpOutcome, LocalObjectStore, ObjectStore};
use crate::jsonpath::values_equal;
use crate::model::{
    CaseModel, Config, DbParams, ExtractRule, ExtractSource, KeywordType, LoopKind, Scope,
    StepDefinition, ValidateRule,
};
use crate::poll;
use crate::providers::Providers;
use crate::report::{
    pass_rate, AssertionResult, ConcurrentDetail, ConcurrentIteration, DataDrivenRun,
    EnvironmentInfo, ExecutionResult, ExecutionSummary, ExtractStatus, LogCollector,
    LoopDetail, RequestDetail, Status, StepResult, WaitDetail,
};
use crate::retry;
use crate::template::Renderer;
use crate::validator::run_assertion;
use crate::variables::VariablePool;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Iteration ceiling for `while` loops.
const WHILE_LOOP_CAP: usize = 1000;

/// Case executor. Everything nondeterministic or environment-bound is
/// injected: providers, DB adapters, custom keywords, the object
/// store for multipart attachments.
pub struct ScenarioRunner {
    providers: Providers,
    renderer: Renderer,
    http: HttpExecutor,
    db: Arc<DbAdapterRegistry>,
    keywords: Arc<KeywordRegistry>,
    global_params: BTreeMap<String, Value>,
    verbose: bool,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new(Providers::system())
    }
}

impl ScenarioRunner {
    pub fn new(providers: Providers) -> Self {
        Self {
            renderer: Renderer::new(providers.clone()),
            http: HttpExecutor::new(Arc::new(LocalObjectStore)),
            db: Arc::new(DbAdapterRegistry::new()),
            keywords: Arc::new(KeywordRegistry::new()),
            global_params: BTreeMap::new(),
            verbose: false,
            providers,
        }
    }

    pub fn with_db(mut self, db: Arc<DbAdapterRegistry>) -> Self {
        self.db = db;
        self
    }

    pub fn with_keywords(mut self, keywords: Arc<KeywordRegistry>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.http = HttpExecutor::new(store);
        self
    }

    pub fn with_global_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.global_params = params;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Execute a case: a single run, or one run per data-driven row
    /// with the rows folded into a `data_driven` sub-report.
    #[instrument(skip(self, case), fields(name = %case.config.name))]
    pub async fn run(&self, case: &CaseModel) -> ExecutionResult {
        if !case.config.enabled {
            let mut doc = self.base_document(&case.config);
            doc.status = Status::Skipped;
            return doc;
        }

        let sets = match data_driven::parameter_sets(case) {
            Ok(sets) => sets,
            Err(e) => {
                let mut doc = self.base_document(&case.config);
                doc.status = Status::Error;
                doc.error = Some(e);
                return doc;
            }
        };

        let sets = match sets {
            None => return self.run_single(case, None).await,
            Some(sets) if sets.rows.is_empty() => return self.run_single(case, None).await,
            Some(sets) => sets,
        };

        // Row order in the output follows the logical row index, not
        // completion order.
        let mut runs = Vec::new();
        let mut first: Option<ExecutionResult> = None;
        for (run_index, row) in sets.rows.iter().enumerate() {
            info!(
                "data-driven run {}/{} of '{}'",
                run_index + 1,
                sets.rows.len(),
                case.config.name
            );
            let result = self.run_single(case, Some(row)).await;
            runs.push(DataDrivenRun {
                run_index,
                parameters: row.clone(),
                status: result.status,
                duration: result.duration,
                summary: result.summary.clone(),
                steps: result.steps.clone(),
            });
            if first.is_none() {
                first = Some(result);
            }
        }

        let status = aggregate_status(runs.iter().map(|r| r.status));
        let aggregate = data_driven::aggregate(&sets, runs);
        let mut doc = first.expect("at least one data-driven run");
        doc.status = status;
        doc.summary.total_data_driven_runs = aggregate.total_runs;
        doc.data_driven = Some(aggregate);
        doc
    }

    /// One pass over `teststeps` with an isolated variable pool.
    async fn run_single(
        &self,
        case: &CaseModel,
        dd_row: Option<&BTreeMap<String, Value>>,
    ) -> ExecutionResult {
        let config = &case.config;
        let clock = self.providers.clock.clone();
        let start_wall = clock.now();
        let started = Instant::now();
        let execution_id = execution_id(&self.providers.entropy.uuid());

        let mut logs = LogCollector::new(clock.clone(), self.verbose);
        logs.info(format!("starting scenario: {}", config.name), None);

        let mut pool = VariablePool::new();
        pool.set_global_params(&self.global_params);
        if let Some(env) = &config.environment {
            pool.set_environment(&env.variables);
        }
        let scenario_vars = match self.resolve_scenario_variables(config, &pool, dd_row) {
            Ok(vars) => vars,
            Err(e) => {
                let mut doc = self.base_document(config);
                doc.execution_id = execution_id;
                doc.status = Status::Error;
                doc.error = Some(e);
                doc.logs = logs.into_entries();
                return doc;
            }
        };
        pool.set_scenario(&scenario_vars);
        if let Some(row) = dd_row {
            pool.set_data_driven(row);
        }

        let base_url = config
            .environment
            .as_ref()
            .map(|e| e.base_url.clone())
            .unwrap_or_default();

        let mut engine_error: Option<EngineError> = None;

        // Pre-SQL is a pseudo-step: logged, never part of `steps`.
        // A failure here aborts the case.
        if let Some(block) = &config.pre_sql {
            logs.info("running pre_sql", None);
            if let Some(e) = self.run_sql_block(block, &pool, &mut logs).await {
                engine_error = Some(e);
            }
        }

        let mut ctx = ExecContext {
            pool,
            logs,
            counters: Counters::default(),
            last_response: None,
            cancel: Arc::new(AtomicBool::new(false)),
            cancel_on_failure: false,
            base_url,
            deadline: config.case_timeout.map(|s| started + Duration::from_secs(s)),
            deadline_hit: false,
        };

        let steps = if engine_error.is_none() {
            self.run_sequence(&case.teststeps, &mut ctx).await
        } else {
            Vec::new()
        };

        if ctx.deadline_hit && engine_error.is_none() {
            engine_error = Some(EngineError::new(
                ErrorCode::TimeoutError,
                format!(
                    "case deadline of {}s exceeded; remaining steps were not launched",
                    config.case_timeout.unwrap_or_default()
                ),
            ));
        }

        // Post-SQL runs even after failures.
        if let Some(block) = &config.post_sql {
            ctx.logs.info("running post_sql", None);
            let pool_view = ctx.pool.clone();
            if let Some(e) = self.run_sql_block(block, &pool_view, &mut ctx.logs).await {
                ctx.logs
                    .warning(format!("post_sql failed: {}", e.message), None);
            }
        }

        let status = if engine_error.is_some()
            || steps.iter().any(|s| s.status == Status::Error)
        {
            Status::Error
        } else if steps.iter().any(|s| s.status == Status::Failed) {
            Status::Failed
        } else {
            Status::Passed
        };

        let end_wall = clock.now();
        let duration = started.elapsed().as_millis() as u64;
        ctx.logs.info(
            format!("scenario finished: {} ({duration}ms)", status.as_str()),
            None,
        );

        let counters = ctx.counters;
        let summary = ExecutionSummary {
            total_steps: steps.len(),
            passed_steps: count(&steps, Status::Passed),
            failed_steps: count(&steps, Status::Failed),
            skipped_steps: count(&steps, Status::Skipped),
            error_steps: count(&steps, Status::Error),
            total_assertions: counters.total_assertions,
            passed_assertions: counters.passed_assertions,
            failed_assertions: counters.failed_assertions,
            pass_rate: pass_rate(counters.passed_assertions, counters.total_assertions),
            total_requests: counters.total_requests,
            total_db_operations: counters.total_db_operations,
            total_extractions: counters.total_extractions,
            avg_response_time: average(&counters.response_times),
            max_response_time: counters.response_times.iter().copied().max().unwrap_or(0),
            min_response_time: counters.response_times.iter().copied().min().unwrap_or(0),
            total_data_driven_runs: 0,
        };

        let environment = config.environment.as_ref().map(|env| EnvironmentInfo {
            name: env.name.clone(),
            base_url: env.base_url.clone(),
            variables: ctx.pool.environment_snapshot(),
        });

        ExecutionResult {
            execution_id,
            scenario_id: config.scenario_id.clone(),
            scenario_name: config.name.clone(),
            project_id: config.project_id.clone(),
            status,
            start_time: start_wall.to_rfc3339(),
            end_time: end_wall.to_rfc3339(),
            duration,
            summary,
            environment,
            steps,
            data_driven: None,
            variables: ctx.pool.snapshot(),
            logs: ctx.logs.into_entries(),
            error: engine_error,
        }
    }

    fn base_document(&self, config: &Config) -> ExecutionResult {
        let mut doc = ExecutionResult::engine_error(
            EngineError::internal("unset"),
            &*self.providers.clock,
            &config.name,
        );
        doc.error = None;
        doc.status = Status::Passed;
        doc.scenario_id = config.scenario_id.clone();
        doc.project_id = config.project_id.clone();
        doc
    }

    async fn run_sql_block(
        &self,
        block: &crate::model::SqlBlock,
        pool: &VariablePool,
        logs: &mut LogCollector,
    ) -> Option<EngineError> {
        let vars = pool.as_map();
        for stmt in &block.statements {
            let params = DbParams {
                datasource: block.datasource.clone(),
                sql: stmt.clone(),
                extract: Vec::new(),
                validate: Vec::new(),
            };
            let out = execute_db(&params, &self.db, &self.renderer, &vars).await;
            match out.error {
                Some(e) => {
                    logs.error(format!("sql statement failed: {}", e.message), None);
                    return Some(e);
                }
                None => logs.debug(format!("sql ok: {stmt}"), None),
            }
        }
        None
    }

    /// Resolve `config.variables` by repeated render passes, so
    /// entries may reference each other, the environment and
    /// built-ins. Ten passes without convergence is a render error.
    fn resolve_scenario_variables(
        &self,
        config: &Config,
        pool: &VariablePool,
        dd_row: Option<&BTreeMap<String, Value>>,
    ) -> Result<BTreeMap<String, Value>, EngineError> {
        let mut current = config.variables.clone();
        for _ in 0..10 {
            let mut merged = pool.as_map();
            for (k, v) in &current {
                merged.insert(k.clone(), v.clone());
            }
            if let Some(row) = dd_row {
                for (k, v) in row {
                    merged.insert(k.clone(), v.clone());
                }
            }

            let mut next = BTreeMap::new();
            for (k, v) in &current {
                next.insert(k.clone(), self.renderer.render_keep_unresolved(v, &merged)?);
            }
            let stable = next == current;
            current = next;
            if stable {
                break;
            }
        }
        for (name, value) in &current {
            if value_has_template(value) {
                return Err(EngineError::new(
                    ErrorCode::VariableRenderError,
                    format!("config.variables.{name} did not resolve after 10 passes"),
                ));
            }
        }
        Ok(current)
    }

    /// Execute a step sequence in order, tracking prior outcomes for
    /// `depends_on` and honoring cooperative cancellation and the
    /// case deadline.
    fn run_sequence<'a>(
        &'a self,
        steps: &'a [StepDefinition],
        ctx: &'a mut ExecContext,
    ) -> Pin<Box<dyn Future<Output = Vec<StepResult>> + Send + 'a>> {
        Box::pin(async move {
            let mut results = Vec::new();
            let mut prior: BTreeMap<String, Status> = BTreeMap::new();
            for step in steps {
                if let Some(deadline) = ctx.deadline {
                    if Instant::now() >= deadline {
                        ctx.deadline_hit = true;
                        break;
                    }
                }
                let result = self.execute_step(step, ctx, &prior).await;
                if ctx.cancel_on_failure
                    && matches!(result.status, Status::Failed | Status::Error)
                {
                    ctx.cancel.store(true, Ordering::SeqCst);
                }
                prior.insert(result.name.clone(), result.status);
                ctx.logs.info(
                    format!("step '{}' finished: {}", result.name, result.status.as_str()),
                    Some(result.step_index),
                );
                results.push(result);
            }
            results
        })
    }

    async fn execute_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        prior: &BTreeMap<String, Status>,
    ) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult {
            step_index: step.index,
            name: step.name.clone(),
            keyword_type: step.keyword_type.as_str().to_string(),
            keyword_name: step.keyword_name.clone(),
            status: Status::Passed,
            start_time: self.providers.clock.now().to_rfc3339(),
            ..StepResult::default()
        };

        if let Some(reason) = self.pre_check(step, ctx, prior) {
            result.status = Status::Skipped;
            result.skip_reason = Some(reason.to_string());
            ctx.logs
                .info(format!("step '{}' skipped ({reason})", step.name), Some(step.index));
        } else {
            let mut setup_ok = true;
            if !step.setup.is_empty() {
                ctx.logs.debug(
                    format!("running {} setup sub-steps", step.setup.len()),
                    Some(step.index),
                );
                let setup_results = self.run_sequence(&step.setup, ctx).await;
                if setup_results
                    .iter()
                    .any(|r| matches!(r.status, Status::Failed | Status::Error))
                {
                    setup_ok = false;
                    result.status = Status::Error;
                    result.error = Some(EngineError::internal(format!(
                        "setup failed for step '{}'",
                        step.name
                    )));
                }
            }

            if setup_ok {
                match step.keyword_type {
                    KeywordType::Request => self.run_request_step(step, ctx, &mut result).await,
                    KeywordType::Assertion => self.run_assertion_step(step, ctx, &mut result),
                    KeywordType::Extract => self.run_extract_step(step, ctx, &mut result),
                    KeywordType::Db => self.run_db_step(step, ctx, &mut result).await,
                    KeywordType::Custom => self.run_custom_step(step, ctx, &mut result).await,
                    KeywordType::Wait => self.run_wait_step(step, ctx, &mut result).await,
                    KeywordType::Loop => self.run_loop_step(step, ctx, &mut result).await,
                    KeywordType::Concurrent => {
                        self.run_concurrent_step(step, ctx, &mut result).await
                    }
                }
            }

            // Teardown runs regardless of the main outcome.
            if !step.teardown.is_empty() {
                ctx.logs.debug(
                    format!("running {} teardown sub-steps", step.teardown.len()),
                    Some(step.index),
                );
                let _ = self.run_sequence(&step.teardown, ctx).await;
            }
        }

        result.end_time = self.providers.clock.now().to_rfc3339();
        result.duration = started.elapsed().as_millis() as u64;
        result
    }

    fn pre_check(
        &self,
        step: &StepDefinition,
        ctx: &ExecContext,
        prior: &BTreeMap<String, Status>,
    ) -> Option<&'static str> {
        if ctx.cancel.load(Ordering::SeqCst) {
            return Some("cancelled");
        }
        if !step.enabled {
            return Some("disabled");
        }
        if let Some(expr) = &step.skip_if {
            if self.eval_predicate(expr, &ctx.pool) {
                return Some("skip_if");
            }
        }
        if let Some(expr) = &step.only_if {
            if !self.eval_predicate(expr, &ctx.pool) {
                return Some("only_if");
            }
        }
        for dep in &step.depends_on {
            if matches!(prior.get(dep), Some(Status::Failed) | Some(Status::Error)) {
                return Some("dependency_failed");
            }
        }
        None
    }

    /// Render a condition and evaluate the tiny predicate grammar:
    /// `<value> <op> <literal>` or a bare truthiness check. Missing
    /// references render empty and therefore evaluate falsy.
    pub fn eval_predicate(&self, expr: &str, pool: &VariablePool) -> bool {
        let rendered = self.renderer.render_condition(expr, &pool.as_map());
        evaluate_predicate(&rendered)
    }

    async fn run_request_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let req = match &step.request {
            Some(req) => req,
            None => {
                result.status = Status::Error;
                result.error = Some(EngineError::internal("request step without request block"));
                return;
            }
        };
        ctx.counters.total_requests += 1;
        let vars = ctx.pool.as_map();
        let base_url = ctx.base_url.clone();

        let outcome = if let Some(poll_config) = &step.poll_config {
            let condition = &poll_config.condition;
            let http = &self.http;
            let renderer = &self.renderer;
            let base = &base_url;
            let run = poll::run_poll(
                poll_config,
                step.on_timeout.as_ref(),
                &*self.providers.entropy,
                |attempt| {
                    // The current attempt number is visible to the
                    // request template as an ephemeral variable.
                    let mut attempt_vars = vars.clone();
                    attempt_vars.insert("poll_attempt".to_string(), json!(attempt));
                    async move { http.execute(req, base, renderer, &attempt_vars).await }
                },
                |attempt: &Result<HttpOutcome, EngineError>| match attempt {
                    Ok(outcome) => {
                        outcome.error.is_none() && poll::condition_holds(condition, outcome)
                    }
                    Err(_) => false,
                },
            )
            .await;
            result.attempts = Some(run.detail.attempts);
            if run.failed {
                result.status = Status::Failed;
            }
            result.poll_detail = Some(run.detail);
            match run.last {
                Some(outcome) => outcome,
                None => {
                    result.status = Status::Failed;
                    return;
                }
            }
        } else {
            let policy = step.retry_policy.as_ref();
            let (outcome, attempts) = retry::run_with_retry(
                policy,
                &*self.providers.entropy,
                |attempt: &Result<HttpOutcome, EngineError>| match attempt {
                    Ok(outcome) => outcome.error.as_ref().map(|e| e.code),
                    Err(e) => Some(e.code),
                },
                |_| self.http.execute(req, &base_url, &self.renderer, &vars),
            )
            .await;
            if policy.is_some() {
                result.attempts = Some(attempts);
            }
            outcome
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                result.status = Status::Error;
                result.error = Some(e);
                result.request_detail = Some(RequestDetail {
                    method: req.method.as_str().to_string(),
                    url: req.url.clone(),
                    body_type: req.body_kind().as_str().to_string(),
                    timeout: req.timeout,
                    allow_redirects: req.allow_redirects,
                    verify_ssl: req.verify,
                    ..RequestDetail::default()
                });
                return;
            }
        };

        ctx.counters.response_times.push(outcome.response_time);
        result.request_detail = Some(outcome.request.clone());
        result.response_detail = Some(outcome.response_detail());

        if let Some(err) = &outcome.error {
            // Transport failure: extractors and validators are
            // skipped for this step.
            result.status = Status::Error;
            result.error = Some(err.clone());
            return;
        }

        let response_var = outcome.as_variable();
        ctx.pool
            .set("last_response", response_var.clone(), Scope::Global);
        ctx.last_response = Some(response_var.clone());

        if !req.extract.is_empty() {
            self.apply_extracts(&req.extract, Some(&response_var), None, ctx, result);
        }
        if !req.validate.is_empty() {
            self.apply_assertions(&req.validate, Some(&response_var), None, ctx, result);
        }
    }

    fn run_assertion_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let rule = match &step.assertion {
            Some(rule) => rule,
            None => {
                result.status = Status::Error;
                result.error =
                    Some(EngineError::internal("assertion step without assertion block"));
                return;
            }
        };
        let vars = ctx.pool.as_map();
        // An explicit source_variable wins over the implicit last
        // response.
        let from_variable = rule
            .source_variable
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| vars.get(name))
            .filter(|v| v.is_object())
            .cloned();
        let response = from_variable.as_ref().or(ctx.last_response.as_ref());

        let assertion = run_assertion(rule, response, &vars, None, &self.renderer);
        ctx.counters.record_assertion(&assertion);
        if assertion.status == Status::Failed {
            result.status = Status::Failed;
        }
        result.assertion_results = Some(vec![assertion]);
    }

    fn run_extract_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let rules = match &step.extract {
            Some(rules) => rules.clone(),
            None => Vec::new(),
        };
        let response = ctx.last_response.clone();
        self.apply_extracts(&rules, response.as_ref(), None, ctx, result);
    }

    async fn run_db_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let params = match &step.db {
            Some(params) => params,
            None => {
                result.status = Status::Error;
                result.error = Some(EngineError::internal("db step without db block"));
                return;
            }
        };
        ctx.counters.total_db_operations += 1;
        let vars = ctx.pool.as_map();

        let policy = step.retry_policy.as_ref();
        let (outcome, attempts) = retry::run_with_retry(
            policy,
            &*self.providers.entropy,
            |out: &DbOutcome| out.error.as_ref().map(|e| e.code),
            |_| execute_db(params, &self.db, &self.renderer, &vars),
        )
        .await;
        if policy.is_some() {
            result.attempts = Some(attempts);
        }

        result.db_detail = outcome.detail.clone();
        if let Some(err) = outcome.error {
            result.status = Status::Error;
            result.error = Some(err);
            return;
        }

        if !params.extract.is_empty() {
            // Rows are the only sensible source in a db step.
            let rules: Vec<ExtractRule> = params
                .extract
                .iter()
                .cloned()
                .map(|mut rule| {
                    rule.source = ExtractSource::DbResult;
                    rule
                })
                .collect();
            self.apply_extracts(&rules, None, Some(&outcome.rows), ctx, result);
        }
        if !params.validate.is_empty() {
            let rules: Vec<ValidateRule> = params
                .validate
                .iter()
                .cloned()
                .map(|mut rule| {
                    rule.target = crate::model::AssertTarget::DbResult;
                    rule
                })
                .collect();
            self.apply_assertions(&rules, None, Some(&outcome.rows), ctx, result);
        }
    }

    async fn run_custom_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let params = step.custom.clone().unwrap_or_default();
        let vars = ctx.pool.as_map();

        let policy = step.retry_policy.as_ref();
        let (outcome, attempts) = retry::run_with_retry(
            policy,
            &*self.providers.entropy,
            |out: &crate::custom::CustomOutcome| out.error.as_ref().map(|e| e.code),
            |_| execute_custom(&step.keyword_name, &params, &self.keywords, &self.renderer, &vars),
        )
        .await;
        if policy.is_some() {
            result.attempts = Some(attempts);
        }

        result.custom_detail = outcome.detail.clone();
        if let Some(err) = outcome.error {
            result.status = Status::Error;
            result.error = Some(err);
            return;
        }

        if !params.extract.is_empty() {
            let fake_response = json!({
                "body": outcome.return_value,
                "headers": {},
                "cookies": {}
            });
            self.apply_extracts(&params.extract, Some(&fake_response), None, ctx, result);
        }
    }

    async fn run_wait_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let wait = match &step.wait {
            Some(wait) => wait,
            None => {
                result.status = Status::Error;
                result.error = Some(EngineError::internal("wait step without wait block"));
                return;
            }
        };
        ctx.logs
            .debug(format!("waiting {}s", wait.seconds), Some(step.index));
        tokio::time::sleep(Duration::from_secs_f64(wait.seconds.max(0.0))).await;
        result.wait_detail = Some(WaitDetail {
            seconds: wait.seconds,
        });
    }

    async fn run_loop_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let params = match &step.loop_params {
            Some(params) => params,
            None => {
                result.status = Status::Error;
                result.error = Some(EngineError::internal("loop step without loop block"));
                return;
            }
        };

        let mut inner = Vec::new();
        let mut iterations = 0;
        match params.kind {
            LoopKind::For => {
                let items = match params.items.as_ref() {
                    Some(items) => match self.renderer.render(items, &ctx.pool.as_map()) {
                        Ok(Value::Array(items)) => items,
                        Ok(other) => {
                            result.status = Status::Error;
                            result.error = Some(EngineError::new(
                                ErrorCode::VariableRenderError,
                                format!("loop items did not resolve to a list: {other}"),
                            ));
                            return;
                        }
                        Err(e) => {
                            result.status = Status::Error;
                            result.error = Some(e);
                            return;
                        }
                    },
                    None => Vec::new(),
                };
                for (index, item) in items.into_iter().enumerate() {
                    ctx.pool.set_ephemeral(params.variable.clone(), item);
                    ctx.pool.set_ephemeral("index", json!(index));
                    inner.extend(self.run_sequence(&params.steps, ctx).await);
                    iterations += 1;
                }
                ctx.pool.remove_ephemeral(&params.variable);
                ctx.pool.remove_ephemeral("index");
            }
            LoopKind::While => {
                let condition = params.condition.as_deref().unwrap_or_default();
                loop {
                    if iterations >= WHILE_LOOP_CAP {
                        result.status = Status::Error;
                        result.error = Some(EngineError::new(
                            ErrorCode::EngineInternalError,
                            format!("while loop exceeded {WHILE_LOOP_CAP} iterations"),
                        ));
                        break;
                    }
                    ctx.pool.set_ephemeral("index", json!(iterations));
                    if !self.eval_predicate(condition, &ctx.pool) {
                        break;
                    }
                    inner.extend(self.run_sequence(&params.steps, ctx).await);
                    iterations += 1;
                }
                ctx.pool.remove_ephemeral("index");
            }
        }

        if result.status != Status::Error {
            if inner.iter().any(|r| r.status == Status::Error) {
                result.status = Status::Error;
            } else if inner.iter().any(|r| r.status == Status::Failed) {
                result.status = Status::Failed;
            }
        }
        result.loop_detail = Some(LoopDetail {
            kind: match params.kind {
                LoopKind::For => "for".to_string(),
                LoopKind::While => "while".to_string(),
            },
            iterations,
            steps: inner,
        });
    }

    async fn run_concurrent_step(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let params = match &step.concurrent {
            Some(params) => params,
            None => {
                result.status = Status::Error;
                result.error =
                    Some(EngineError::internal("concurrent step without concurrent block"));
                return;
            }
        };

        // Bounded fan-out: a work queue of `concurrency` permits over
        // `iterations` isolated overlays of the pool.
        let semaphore = Arc::new(tokio::sync::Semaphore::new(params.concurrency));
        let cancel = Arc::new(AtomicBool::new(false));
        let stop_on_assertion = step
            .retry_policy
            .as_ref()
            .map_or(false, |p| p.stop_on.iter().any(|k| k == "assertion"));

        let mut workers = Vec::new();
        for index in 0..params.iterations {
            let mut child = ExecContext {
                pool: ctx.pool.clone(),
                logs: LogCollector::new(self.providers.clock.clone(), self.verbose),
                counters: Counters::default(),
                last_response: ctx.last_response.clone(),
                cancel: cancel.clone(),
                cancel_on_failure: stop_on_assertion,
                base_url: ctx.base_url.clone(),
                deadline: ctx.deadline,
                deadline_hit: false,
            };
            child.pool.set_ephemeral("index", json!(index));
            let semaphore = semaphore.clone();
            workers.push(async move {
                let _permit = semaphore.acquire().await.ok();
                let steps = self.run_sequence(&params.steps, &mut child).await;
                (child, steps)
            });
        }

        // Join preserves start order, so merges below are
        // deterministic regardless of completion order.
        let joined = futures::future::join_all(workers).await;
        let mut iterations = Vec::new();
        for (index, (child, steps)) in joined.into_iter().enumerate() {
            let ExecContext {
                mut pool,
                logs,
                counters,
                ..
            } = child;
            ctx.counters.absorb(counters);
            ctx.logs.extend(logs.into_entries());
            ctx.pool.merge_extracted(pool.take_extracted());
            let status = aggregate_status(steps.iter().map(|s| s.status));
            iterations.push(ConcurrentIteration {
                index,
                status,
                steps,
            });
        }

        let status = aggregate_status(iterations.iter().map(|i| i.status));
        if status != Status::Passed {
            result.status = status;
        }
        result.concurrent_detail = Some(ConcurrentDetail {
            concurrency: params.concurrency,
            iterations,
        });
    }

    fn apply_extracts(
        &self,
        rules: &[ExtractRule],
        response: Option<&Value>,
        db_rows: Option<&Value>,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let vars = ctx.pool.as_map();
        let extracts = run_extract_batch(rules, response, &vars, db_rows);
        ctx.counters.total_extractions += extracts.len();
        for (rule, extract) in rules.iter().zip(&extracts) {
            match extract.status {
                ExtractStatus::Success => {
                    ctx.pool
                        .set(rule.name.clone(), extract.value.clone(), rule.scope);
                }
                ExtractStatus::Failed => {
                    // Non-fatal: the step stands or falls on its
                    // assertions and executor outcome.
                    ctx.logs.warning(
                        format!("extraction '{}' found no value", rule.name),
                        Some(result.step_index),
                    );
                }
            }
        }
        match result.extract_results.as_mut() {
            Some(existing) => existing.extend(extracts),
            None => result.extract_results = Some(extracts),
        }
    }

    fn apply_assertions(
        &self,
        rules: &[ValidateRule],
        response: Option<&Value>,
        db_rows: Option<&Value>,
        ctx: &mut ExecContext,
        result: &mut StepResult,
    ) {
        let vars = ctx.pool.as_map();
        let mut assertions = Vec::new();
        for rule in rules {
            let assertion = run_assertion(rule, response, &vars, db_rows, &self.renderer);
            ctx.counters.record_assertion(&assertion);
            if assertion.status == Status::Failed && result.status != Status::Error {
                result.status = Status::Failed;
            }
            assertions.push(assertion);
        }
        match result.assertion_results.as_mut() {
            Some(existing) => existing.extend(assertions),
            None => result.assertion_results = Some(assertions),
        }
    }
}

/// Mutable state of one scheduler pass. Concurrent workers receive an
/// isolated clone and are merged on join.
struct ExecContext {
    pool: VariablePool,
    logs: LogCollector,
    counters: Counters,
    last_response: Option<Value>,
    cancel: Arc<AtomicBool>,
    cancel_on_failure: bool,
    base_url: String,
    deadline: Option<Instant>,
    deadline_hit: bool,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    total_assertions: usize,
    passed_assertions: usize,
    failed_assertions: usize,
    total_requests: usize,
    total_db_operations: usize,
    total_extractions: usize,
    response_times: Vec<u64>,
}

impl Counters {
    fn record_assertion(&mut self, assertion: &AssertionResult) {
        self.total_assertions += 1;
        if assertion.status == Status::Passed {
            self.passed_assertions += 1;
        } else {
            self.failed_assertions += 1;
        }
    }

    fn absorb(&mut self, other: Counters) {
        self.total_assertions += other.total_assertions;
        self.passed_assertions += other.passed_assertions;
        self.failed_assertions += other.failed_assertions;
        self.total_requests += other.total_requests;
        self.total_db_operations += other.total_db_operations;
        self.total_extractions += other.total_extractions;
        self.response_times.extend(other.response_times);
    }
}

fn execution_id(uuid: &str) -> String {
    let hex: String = uuid.chars().filter(|c| *c != '-').take(12).collect();
    format!("exec-{hex}")
}

fn count(steps: &[StepResult], status: Status) -> usize {
    steps.iter().filter(|s| s.status == status).count()
}

fn average(values: &[u64]) -> u64 {
    if values.is_empty() {
        0
    } else {
        values.iter().sum::<u64>() / values.len() as u64
    }
}

fn aggregate_status(statuses: impl Iterator<Item = Status>) -> Status {
    let mut out = Status::Passed;
    for status in statuses {
        match status {
            Status::Error => return Status::Error,
            Status::Failed => out = Status::Failed,
            _ => {}
        }
    }
    out
}

/// Evaluate an already-rendered predicate string.
fn evaluate_predicate(rendered: &str) -> bool {
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        return false;
    }
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = trimmed.find(op) {
            let lhs = parse_predicate_scalar(&trimmed[..idx]);
            let rhs = parse_predicate_scalar(&trimmed[idx + op.len()..]);
            return match op {
                "==" => values_equal(&lhs, &rhs),
                "!=" => !values_equal(&lhs, &rhs),
                _ => {
                    let (a, b) = match (scalar_as_f64(&lhs), scalar_as_f64(&rhs)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return false,
                    };
                    match op {
                        ">=" => a >= b,
                        "<=" => a <= b,
                        ">" => a > b,
                        "<" => a < b,
                        _ => false,
                    }
                }
            };
        }
    }
    !matches!(
        trimmed.to_lowercase().as_str(),
        "false" | "0" | "no" | "null" | "none"
    )
}

fn parse_predicate_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    match raw.to_lowercase().as_str() {
        "null" | "none" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn scalar_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_has_template(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Array(items) => items.iter().any(value_has_template),
        Value::Object(map) => map.values().any(value_has_template),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::Keyword;
    use crate::loader::parse_case_str;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(Providers::fixed(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ))
    }

    struct Echo;

    #[async_trait]
    impl Keyword for Echo {
        async fn execute(&self, parameters: &BTreeMap<String, Value>) -> anyhow::Result<Value> {
            Ok(parameters
                .get("value")
                .cloned()
                .unwrap_or(Value::Null))
        }
    }

    fn runner_with_echo() -> ScenarioRunner {
        let mut keywords = KeywordRegistry::new();
        keywords.register("echo", Arc::new(Echo));
        runner().with_keywords(Arc::new(keywords))
    }

    #[test]
    fn test_predicate_comparisons() {
        assert!(evaluate_predicate("1 == 1"));
        assert!(evaluate_predicate("1 != 2"));
        assert!(evaluate_predicate("2 > 1"));
        assert!(evaluate_predicate("2 >= 2"));
        assert!(evaluate_predicate("1 < 2"));
        assert!(evaluate_predicate("'abc' == 'abc'"));
        assert!(evaluate_predicate("true == true"));
        assert!(evaluate_predicate("null == null"));
        assert!(!evaluate_predicate("abc > 1"));
    }

    #[test]
    fn test_predicate_truthiness() {
        assert!(!evaluate_predicate(""));
        assert!(!evaluate_predicate("false"));
        assert!(!evaluate_predicate("0"));
        assert!(!evaluate_predicate("null"));
        assert!(evaluate_predicate("true"));
        assert!(evaluate_predicate("anything"));
        assert!(evaluate_predicate("1"));
    }

    #[test]
    fn test_aggregate_status() {
        use Status::*;
        assert_eq!(aggregate_status([Passed, Passed].into_iter()), Passed);
        assert_eq!(aggregate_status([Passed, Failed].into_iter()), Failed);
        assert_eq!(aggregate_status([Failed, Error].into_iter()), Error);
        assert_eq!(aggregate_status([Skipped].into_iter()), Passed);
        assert_eq!(aggregate_status(std::iter::empty()), Passed);
    }

    #[test]
    fn test_execution_id_shape() {
        let id = execution_id("00000000-0000-4000-8000-000000000000");
        assert_eq!(id, "exec-000000000000");
        assert_eq!(id.len(), 5 + 12);
    }

    #[tokio::test]
    async fn test_wait_step_and_summary() {
        let case = parse_case_str(
            r#"
config:
  name: "waits"
  scenario_id: "scen-9"
  project_id: "proj-9"
teststeps:
  - name: "short pause"
    keyword_type: wait
    wait: {seconds: 0.01}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        assert_eq!(doc.scenario_id, "scen-9");
        assert_eq!(doc.summary.total_steps, 1);
        assert_eq!(doc.summary.passed_steps, 1);
        assert_eq!(doc.steps[0].wait_detail.as_ref().unwrap().seconds, 0.01);
        assert!(doc.execution_id.starts_with("exec-"));
    }

    #[tokio::test]
    async fn test_disabled_step_is_skipped() {
        let case = parse_case_str(
            r#"
config:
  name: "skip"
teststeps:
  - name: "off"
    keyword_type: wait
    enabled: false
    wait: {seconds: 1000}
  - name: "on"
    keyword_type: wait
    wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        assert_eq!(doc.steps[0].status, Status::Skipped);
        assert_eq!(doc.steps[0].skip_reason.as_deref(), Some("disabled"));
        assert_eq!(doc.summary.skipped_steps, 1);
        assert_eq!(doc.summary.passed_steps, 1);
    }

    #[tokio::test]
    async fn test_skip_if_and_only_if() {
        let case = parse_case_str(
            r#"
config:
  name: "conditions"
  variables:
    mode: "fast"
teststeps:
  - name: "skipped by skip_if"
    keyword_type: wait
    skip_if: "{{mode}} == fast"
    wait: {seconds: 0}
  - name: "skipped by only_if"
    keyword_type: wait
    only_if: "{{mode}} == slow"
    wait: {seconds: 0}
  - name: "runs"
    keyword_type: wait
    only_if: "{{mode}} == fast"
    wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.steps[0].skip_reason.as_deref(), Some("skip_if"));
        assert_eq!(doc.steps[1].skip_reason.as_deref(), Some("only_if"));
        assert_eq!(doc.steps[2].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_dependency_failure_cascades_to_skip() {
        let case = parse_case_str(
            r#"
config:
  name: "deps"
teststeps:
  - name: "failing assertion"
    keyword_type: assertion
    assertion:
      target: env_variable
      expression: "missing"
      comparator: is_not_null
  - name: "dependent"
    keyword_type: wait
    depends_on: ["failing assertion"]
    wait: {seconds: 0}
  - name: "independent"
    keyword_type: wait
    wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Failed);
        assert_eq!(doc.steps[0].status, Status::Failed);
        assert_eq!(doc.steps[1].status, Status::Skipped);
        assert_eq!(
            doc.steps[1].skip_reason.as_deref(),
            Some("dependency_failed")
        );
        assert_eq!(doc.steps[2].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_custom_step_with_extraction() {
        let case = parse_case_str(
            r#"
config:
  name: "custom"
  variables:
    payload: "hello"
teststeps:
  - name: "echo payload"
    keyword_type: custom
    keyword_name: echo
    custom:
      parameters:
        value: {nested: "{{payload}}"}
      extract:
        - name: echoed
          type: json
          expression: "$.nested"
  - name: "assert echoed"
    keyword_type: assertion
    assertion:
      target: env_variable
      expression: "echoed"
      comparator: eq
      expected: "hello"
"#,
        )
        .unwrap();
        let doc = runner_with_echo().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        assert_eq!(doc.variables["echoed"], json!("hello"));
        assert_eq!(doc.summary.total_extractions, 1);
        assert_eq!(doc.summary.passed_assertions, 1);
    }

    #[tokio::test]
    async fn test_unknown_keyword_is_step_error() {
        let case = parse_case_str(
            r#"
config:
  name: "bad keyword"
teststeps:
  - name: "boom"
    keyword_type: custom
    keyword_name: nope
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Error);
        assert_eq!(doc.steps[0].status, Status::Error);
        assert_eq!(
            doc.steps[0].error.as_ref().unwrap().code,
            ErrorCode::KeywordNotFound
        );
        // Top-level error stays empty for step-scoped failures.
        assert!(doc.error.is_none());
    }

    #[tokio::test]
    async fn test_for_loop_publishes_item_and_index() {
        let case = parse_case_str(
            r#"
config:
  name: "loop"
teststeps:
  - name: "sum via echo"
    keyword_type: loop
    loop:
      kind: for
      items: [10, 20]
      variable: current
      steps:
        - name: "echo item"
          keyword_type: custom
          keyword_name: echo
          custom:
            parameters:
              value: {item: "{{current}}", at: "{{index}}"}
            extract:
              - name: last_item
                type: json
                expression: "$.item"
"#,
        )
        .unwrap();
        let doc = runner_with_echo().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        let detail = doc.steps[0].loop_detail.as_ref().unwrap();
        assert_eq!(detail.iterations, 2);
        assert_eq!(detail.steps.len(), 2);
        // Last iteration wins the extracted slot.
        assert_eq!(doc.variables["last_item"], json!(20));
        // Iterator variables do not leak past the loop.
        assert!(!doc.variables.contains_key("current"));
        assert!(!doc.variables.contains_key("index"));
    }

    #[tokio::test]
    async fn test_while_loop_runs_until_condition_flips() {
        let case = parse_case_str(
            r#"
config:
  name: "while"
teststeps:
  - name: "three rounds"
    keyword_type: loop
    loop:
      kind: while
      condition: "{{index}} < 3"
      steps:
        - name: "tick"
          keyword_type: wait
          wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        assert_eq!(doc.steps[0].loop_detail.as_ref().unwrap().iterations, 3);
    }

    #[tokio::test]
    async fn test_concurrent_fanout_merges_deterministically() {
        let case = parse_case_str(
            r#"
config:
  name: "fanout"
teststeps:
  - name: "parallel echoes"
    keyword_type: concurrent
    concurrent:
      concurrency: 2
      iterations: 4
      steps:
        - name: "echo index"
          keyword_type: custom
          keyword_name: echo
          custom:
            parameters:
              value: {at: "{{index}}"}
            extract:
              - name: winner
                type: json
                expression: "$.at"
"#,
        )
        .unwrap();
        let doc = runner_with_echo().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        let detail = doc.steps[0].concurrent_detail.as_ref().unwrap();
        assert_eq!(detail.concurrency, 2);
        assert_eq!(detail.iterations.len(), 4);
        for (i, iteration) in detail.iterations.iter().enumerate() {
            assert_eq!(iteration.index, i);
            assert_eq!(iteration.status, Status::Passed);
        }
        // Merge is last-writer-wins by iteration index.
        assert_eq!(doc.variables["winner"], json!(3));
        assert_eq!(doc.summary.total_extractions, 4);
    }

    #[tokio::test]
    async fn test_setup_failure_marks_step_error_and_teardown_runs() {
        let case = parse_case_str(
            r#"
config:
  name: "hooks"
teststeps:
  - name: "guarded"
    keyword_type: wait
    wait: {seconds: 0}
    setup:
      - name: "failing precheck"
        keyword_type: assertion
        assertion:
          target: env_variable
          expression: "absent"
          comparator: is_not_null
    teardown:
      - name: "cleanup"
        keyword_type: custom
        keyword_name: echo
        custom:
          parameters:
            value: {done: true}
          extract:
            - name: cleaned
              type: json
              expression: "$.done"
"#,
        )
        .unwrap();
        let doc = runner_with_echo().run(&case).await;
        assert_eq!(doc.steps[0].status, Status::Error);
        // Teardown ran: its extraction is visible.
        assert_eq!(doc.variables["cleaned"], json!(true));
    }

    #[tokio::test]
    async fn test_data_driven_rows_in_order() {
        let case = parse_case_str(
            r#"
config:
  name: "ddt"
teststeps:
  - name: "row assert"
    keyword_type: assertion
    assertion:
      target: env_variable
      expression: "code"
      comparator: lt
      expected: 50000
ddts:
  name: "rows"
  parameters:
    - {email: "a@x", code: 0}
    - {email: "b@x", code: 40001}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        let dd = doc.data_driven.as_ref().unwrap();
        assert_eq!(dd.total_runs, 2);
        assert_eq!(dd.passed_runs, 2);
        assert_eq!(dd.source, "yaml_inline");
        assert_eq!(dd.runs[0].parameters["email"], json!("a@x"));
        assert_eq!(dd.runs[1].parameters["email"], json!("b@x"));
        assert_eq!(doc.summary.total_data_driven_runs, 2);
        // All rows share the same parameter key set.
        assert_eq!(
            dd.runs[0].parameters.keys().collect::<Vec<_>>(),
            dd.runs[1].parameters.keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_nested_config_variables_resolve() {
        let case = parse_case_str(
            r#"
config:
  name: "nested vars"
  environment:
    name: dev
    base_url: "http://h"
    variables:
      tenant: "acme"
  variables:
    greeting: "hello {{tenant}}"
    loud: "{{greeting}}!"
teststeps:
  - name: "check"
    keyword_type: assertion
    assertion:
      target: env_variable
      expression: "loud"
      comparator: eq
      expected: "hello acme!"
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Passed);
        // Case variables resolve for execution (the assertion above
        // saw "hello acme!") but stay out of the variables snapshot.
        assert!(!doc.variables.contains_key("loud"));
        assert!(!doc.variables.contains_key("greeting"));
        assert_eq!(doc.variables["tenant"], json!("acme"));
    }

    #[tokio::test]
    async fn test_unresolvable_config_variable_is_engine_error() {
        let case = parse_case_str(
            r#"
config:
  name: "circular"
  variables:
    a: "{{b}}"
    b: "{{a}}"
teststeps:
  - name: "never runs"
    keyword_type: wait
    wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Error);
        assert_eq!(
            doc.error.as_ref().unwrap().code,
            ErrorCode::VariableRenderError
        );
        assert!(doc.steps.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_case_is_skipped() {
        let case = parse_case_str(
            r#"
config:
  name: "off"
  enabled: false
teststeps:
  - name: "never"
    keyword_type: wait
    wait: {seconds: 100}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Skipped);
        assert!(doc.steps.is_empty());
    }

    #[tokio::test]
    async fn test_case_deadline_stops_launching() {
        let case = parse_case_str(
            r#"
config:
  name: "deadline"
  case_timeout: 0
teststeps:
  - name: "never launched"
    keyword_type: wait
    wait: {seconds: 0}
"#,
        )
        .unwrap();
        let doc = runner().run(&case).await;
        assert_eq!(doc.status, Status::Error);
        assert_eq!(doc.error.as_ref().unwrap().code, ErrorCode::TimeoutError);
        assert!(doc.steps.is_empty());
    }

    #[tokio::test]
    async fn test_extract_step_failure_does_not_fail_step() {
        let case = parse_case_str(
            r#"
config:
  name: "extract miss"
teststeps:
  - name: "echo"
    keyword_type: custom
    keyword_name: echo
    custom:
      parameters:
        value: {a: 1}
      extract:
        - name: missing
          type: json
          expression: "$.nope"
"#,
        )
        .unwrap();
        let doc = runner_with_echo().run(&case).await;
        // The extraction failed but the step did not.
        assert_eq!(doc.steps[0].status, Status::Passed);
        let extracts = doc.steps[0].extract_results.as_ref().unwrap();
        assert_eq!(extracts[0].status, ExtractStatus::Failed);
        assert!(!doc.variables.contains_key("missing"));
    }
}
