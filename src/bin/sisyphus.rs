//! sisyphus CLI - YAML-driven API test execution.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use sisyphus::report::{ExecutionResult, Status};
use sisyphus::{config, loader, ScenarioRunner};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// YAML-driven API test orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "sisyphus", version, about)]
struct Cli {
    /// Run a single scenario file.
    #[arg(long = "case")]
    case: Option<PathBuf>,

    /// Run multiple scenario files or directories (directories are
    /// walked recursively for *.yaml / *.yml).
    #[arg(long = "cases", num_args = 1..)]
    cases: Vec<PathBuf>,

    /// Reporter: text (default), json, allure, html.
    #[arg(short = 'O', long = "output-format", default_value = "text")]
    output_format: OutputFormat,

    /// Output directory for the allure reporter.
    #[arg(long = "allure-dir")]
    allure_dir: Option<PathBuf>,

    /// Output directory for the html reporter.
    #[arg(long = "html-dir")]
    html_dir: Option<PathBuf>,

    /// Include DEBUG logs in output and collected logs.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Override the active profile from .sisyphus/config.yaml.
    #[arg(long = "profile")]
    profile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Allure,
    Html,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .try_init();
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Passed => "\x1b[32mPASS\x1b[0m",
        Status::Failed => "\x1b[31mFAIL\x1b[0m",
        Status::Error => "\x1b[31mERROR\x1b[0m",
        Status::Skipped => "\x1b[33mSKIP\x1b[0m",
    }
}

fn print_text_report(result: &ExecutionResult, verbose: bool) {
    info!(
        "{} scenario: {} ({} ms)",
        status_label(result.status),
        result.scenario_name,
        result.duration
    );
    if let Some(err) = &result.error {
        error!("  \x1b[31m{}: {}\x1b[0m", err.code.as_str(), err.message);
    }

    for step in &result.steps {
        let mark = match step.status {
            Status::Passed => "\x1b[32m✓\x1b[0m",
            Status::Skipped => "\x1b[33m-\x1b[0m",
            _ => "\x1b[31m✗\x1b[0m",
        };
        info!(
            "  {}. {} {} ({} ms)",
            step.step_index + 1,
            mark,
            step.name,
            step.duration
        );
        if let Some(err) = &step.error {
            error!("     \x1b[31m{}: {}\x1b[0m", err.code.as_str(), err.message);
        }
        for assertion in step.assertion_results.iter().flatten() {
            if assertion.status == Status::Failed {
                error!(
                    "     \x1b[31massert {} {}: {}\x1b[0m",
                    assertion.target,
                    assertion.comparator,
                    assertion.message.as_deref().unwrap_or("failed")
                );
            }
        }
        if verbose {
            if let Some(req) = &step.request_detail {
                debug!("     Request: {} {}", req.method, req.url);
            }
            if let Some(resp) = &step.response_detail {
                debug!(
                    "     Response: {} ({} bytes, {} ms)",
                    resp.status_code, resp.body_size, resp.response_time
                );
            }
        }
    }

    let s = &result.summary;
    info!(
        "Summary: {} steps (\x1b[32m{} passed\x1b[0m, \x1b[31m{} failed\x1b[0m, {} skipped, {} error) | {}/{} assertions | pass rate {:.1}%",
        s.total_steps,
        s.passed_steps,
        s.failed_steps,
        s.skipped_steps,
        s.error_steps,
        s.passed_assertions,
        s.total_assertions,
        s.pass_rate
    );
    if let Some(dd) = &result.data_driven {
        info!(
            "Data-driven: {}/{} runs passed ({})",
            dd.passed_runs, dd.total_runs, dd.dataset_name
        );
    }
}

/// allure/html rendering is delegated to external tooling; the CLI
/// hands over the result document.
fn write_report_document(result: &ExecutionResult, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .context(format!("failed to create report dir {}", dir.display()))?;
    let name = if result.execution_id.is_empty() {
        format!("{}.json", result.scenario_name.replace([' ', '/'], "_"))
    } else {
        format!("{}.json", result.execution_id)
    };
    let path = dir.join(name);
    fs::write(&path, result.to_json_pretty())
        .context(format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn collect_targets(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if let Some(case) = &cli.case {
        files.push(case.clone());
    }
    for target in &cli.cases {
        if target.is_dir() {
            files.extend(
                loader::collect_case_files(target)
                    .map_err(|e| anyhow!("{}", e.message))?,
            );
        } else {
            files.push(target.clone());
        }
    }
    if files.is_empty() {
        return Err(anyhow!("one of --case or --cases is required"));
    }
    Ok(files)
}

async fn run_one(path: &Path, cli: &Cli) -> ExecutionResult {
    let providers = sisyphus::providers::Providers::system();

    let case = match loader::load_case(path) {
        Ok(case) => case,
        Err(e) => {
            return ExecutionResult::engine_error(
                e,
                &*providers.clock,
                &path.display().to_string(),
            )
        }
    };

    let mut case = case;
    let mut global_params = Default::default();
    match config::load_for_case(path) {
        Ok(Some(profiles)) => {
            profiles.apply(&mut case, cli.profile.as_deref());
            global_params = profiles.variables;
        }
        Ok(None) => {
            if let Some(profile) = &cli.profile {
                debug!("--profile {profile} given but no .sisyphus/config.yaml found");
            }
        }
        Err(e) => {
            return ExecutionResult::engine_error(
                e,
                &*providers.clock,
                &case.config.name,
            )
        }
    }

    let runner = ScenarioRunner::new(providers)
        .with_verbose(cli.verbose)
        .with_global_params(global_params);
    runner.run(&case).await
}

fn report(result: &ExecutionResult, cli: &Cli) {
    match cli.output_format {
        OutputFormat::Json => {
            println!("{}", result.to_json_pretty());
        }
        OutputFormat::Text => print_text_report(result, cli.verbose),
        OutputFormat::Allure => {
            let dir = cli
                .allure_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("allure-results"));
            match write_report_document(result, &dir) {
                Ok(path) => info!("result document written: {}", path.display()),
                Err(e) => error!("failed to write allure document: {e}"),
            }
            print_text_report(result, cli.verbose);
        }
        OutputFormat::Html => {
            let dir = cli
                .html_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("html-report"));
            match write_report_document(result, &dir) {
                Ok(path) => info!("result document written: {}", path.display()),
                Err(e) => error!("failed to write html document: {e}"),
            }
            print_text_report(result, cli.verbose);
        }
    }
}

/// Engine errors (parse failures, internal errors, case deadline) are
/// the only non-zero exits; assertion failures exit 0.
fn is_engine_failure(result: &ExecutionResult) -> bool {
    result.error.is_some()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let files = collect_targets(&cli)?;
    info!("running {} case file(s)", files.len());

    let mut engine_failure = false;
    for path in &files {
        let result = run_one(path, &cli).await;
        report(&result, &cli);
        if is_engine_failure(&result) {
            engine_failure = true;
        }
    }

    if engine_failure {
        exit(1);
    }
    Ok(())
}
