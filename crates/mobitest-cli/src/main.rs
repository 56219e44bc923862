//! Command-line runner for mobitest.
//!
//! Loads a capability matrix and a test plan, runs the plan on every device
//! in the matrix against a remote WebDriver endpoint, and prints one result
//! per device.
//!
//! # Usage
//!
//! ```bash
//! # Run a plan on every device in the matrix, at most 4 sessions at a time
//! mobitest run --matrix devices.json --plan login.json -j 4
//!
//! # Point at a different Appium server
//! mobitest run -m devices.json -p login.json --endpoint 10.0.0.5:4723/wd/hub
//!
//! # Stop each session at its first failed step, give up after 5 minutes
//! mobitest run -m devices.json -p login.json --bail --deadline-secs 300
//!
//! # Machine-readable results
//! mobitest run -m devices.json -p login.json --format json > results.json
//!
//! # Check the files without touching a device
//! mobitest validate --matrix devices.json --plan login.json
//!
//! # Log to ~/.mobitest/logs/mobitest.log instead of stderr
//! RUST_LOG=mobitest_core=debug mobitest --log-file run -m devices.json -p login.json
//! ```
//!
//! Exit codes: 0 when every session passed, 1 when any session failed or
//! errored, 2 for unusable input files or flags, 3 when the endpoint client
//! can't be built.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use mobitest_core::artifacts::ArtifactStore;
use mobitest_core::client::WebDriverClient;
use mobitest_core::config::{logs_dir, CapabilityMatrix, ConfigError, Endpoint, RunnerConfig};
use mobitest_core::coordinator::{allocate_session_ports, Coordinator};
use mobitest_core::lifecycle::{DefaultHooks, LifecycleOptions};
use mobitest_core::result::{RunSummary, SessionResult, StepOutcome};
use mobitest_core::step::{Scenario, TestPlan};
use mobitest_core::wait::WaitConfig;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Run mobile UI test plans across devices in parallel.
#[derive(Parser)]
#[command(name = "mobitest")]
#[command(about = "Run mobile UI test plans across devices in parallel")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Runner config file (defaults to ~/.mobitest/config.json)
    #[arg(short, long, env = "MOBITEST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    /// Directory for the log file (defaults to ~/.mobitest/logs)
    #[arg(long, env = "MOBITEST_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a test plan on every device of a capability matrix
    Run(RunArgs),

    /// Check a capability matrix and a test plan without running anything
    Validate {
        /// Capability matrix (JSON array or {"capabilities": [...]})
        #[arg(short, long, env = "MOBITEST_MATRIX")]
        matrix: PathBuf,
        /// Test plan
        #[arg(short, long, env = "MOBITEST_PLAN")]
        plan: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Capability matrix (JSON array or {"capabilities": [...]})
    #[arg(short, long, env = "MOBITEST_MATRIX")]
    matrix: PathBuf,

    /// Test plan
    #[arg(short, long, env = "MOBITEST_PLAN")]
    plan: PathBuf,

    /// Maximum number of sessions running at once
    #[arg(short = 'j', long, env = "MOBITEST_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// WebDriver endpoint as host:port[/base/path]
    #[arg(short, long, env = "MOBITEST_ENDPOINT")]
    endpoint: Option<String>,

    /// Directory for screenshots, page sources and recordings
    #[arg(short, long, env = "MOBITEST_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    /// Default element wait timeout in milliseconds
    #[arg(long, env = "MOBITEST_WAIT_TIMEOUT")]
    wait_timeout_ms: Option<u64>,

    /// Per-session time budget for the steps, in seconds
    #[arg(long, env = "MOBITEST_DEADLINE")]
    deadline_secs: Option<u64>,

    /// Stop each session at its first failed step
    #[arg(long)]
    bail: bool,

    /// Don't capture screenshots and page sources for failed steps
    #[arg(long)]
    no_capture: bool,
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_file {
        let dir = cli.log_dir.clone().unwrap_or_else(logs_dir);
        let file_appender = tracing_appender::rolling::never(&dir, "mobitest.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Client(String),
    Output(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::from(2),
            CliError::Client(_) => ExitCode::from(3),
            CliError::Output(_) => ExitCode::from(1),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Client(msg) => write!(f, "Endpoint error: {}", msg),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

fn load_config(cli: &Cli) -> Result<RunnerConfig, CliError> {
    match &cli.config {
        Some(path) => Ok(RunnerConfig::load_from(path)?),
        None => Ok(RunnerConfig::load()),
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = load_config(&cli)?;
    match &cli.command {
        Command::Validate { matrix, plan } => validate(&cli, matrix, plan),
        Command::Run(args) => run_plan(&cli, config, args).await,
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(cli: &Cli, matrix: &Path, plan: &Path) -> Result<ExitCode, CliError> {
    let mut matrix = CapabilityMatrix::load(matrix)?;
    let plan = TestPlan::load(plan)?;
    allocate_session_ports(&mut matrix.capabilities);

    let mut problems = Vec::new();
    for caps in &matrix.capabilities {
        for err in plan.unresolved_selectors(caps.platform) {
            problems.push(format!("{}: {}", caps.label(), err));
        }
    }

    if cli.format == OutputFormat::Json {
        let devices: Vec<_> = matrix
            .capabilities
            .iter()
            .map(|caps| {
                serde_json::json!({
                    "device": caps.label(),
                    "sessionPort": caps.session_port,
                })
            })
            .collect();
        let report = serde_json::json!({
            "valid": problems.is_empty(),
            "plan": plan.name,
            "steps": plan.steps.len(),
            "devices": devices,
            "problems": problems,
        });
        println!("{}", report);
    } else {
        println!(
            "plan '{}': {} steps, {} devices",
            plan.name,
            plan.steps.len(),
            matrix.len()
        );
        for caps in &matrix.capabilities {
            let port = caps
                .session_port
                .map(|p| p.to_string())
                .unwrap_or_default();
            println!("  {} (port {})", caps.label(), port);
        }
        for problem in &problems {
            println!("  problem: {}", problem);
        }
    }

    if problems.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_plan(cli: &Cli, config: RunnerConfig, args: &RunArgs) -> Result<ExitCode, CliError> {
    let matrix = CapabilityMatrix::load(&args.matrix)?;
    let plan = TestPlan::load(&args.plan)?;

    let endpoint = match &args.endpoint {
        Some(text) => Endpoint::parse(text)?,
        None => config.endpoint.clone(),
    };
    let max_concurrency = args.max_concurrency.unwrap_or(config.max_instances);
    let artifacts = args.artifacts.clone().unwrap_or_else(|| config.artifacts_dir());
    let wait = WaitConfig {
        poll_interval: config.poll_interval(),
        default_timeout: args
            .wait_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.wait_timeout()),
    };
    let options = LifecycleOptions {
        wait,
        deadline: args.deadline_secs.map(Duration::from_secs),
        bail: args.bail,
        capture_on_failure: !args.no_capture,
        ..Default::default()
    };

    let client = WebDriverClient::new(&endpoint, config.command_timeout())
        .map_err(|e| CliError::Client(e.to_string()))?;
    info!(
        endpoint = %client.base_url(),
        plan = %plan.name,
        devices = matrix.len(),
        max_concurrency,
        "starting run"
    );

    let coordinator = Coordinator::new(
        Arc::new(client),
        Scenario::from(plan),
        ArtifactStore::new(artifacts),
    )
    .with_hooks(Arc::new(DefaultHooks::new(config.session_defaults.clone())))
    .with_options(options);

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling remaining steps");
            eprintln!("Interrupted, tearing down sessions...");
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let results = coordinator.run(&matrix, max_concurrency).await;
    let summary = RunSummary::from_results(&results, started.elapsed());

    match cli.format {
        OutputFormat::Json => {
            let report = serde_json::json!({ "summary": summary, "sessions": results });
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{}", text);
        }
        OutputFormat::Text => print_text(&results, &summary),
    }

    if summary.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn outcome_label(outcome: StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Pass => "PASS",
        StepOutcome::Fail => "FAIL",
        StepOutcome::Error => "ERROR",
    }
}

fn print_text(results: &[SessionResult], summary: &RunSummary) {
    for result in results {
        println!(
            "{:<5} {}  ({} ms)",
            outcome_label(result.outcome),
            result.device,
            result.duration.as_millis()
        );
        if let Some(error) = &result.error {
            println!("      {}", error);
        }
        for step in &result.steps {
            let marker = match step.outcome {
                StepOutcome::Pass => "ok",
                StepOutcome::Fail => "FAIL",
                StepOutcome::Error => "ERR",
            };
            match &step.message {
                Some(message) => println!("  {:<4} {}: {}", marker, step.name, message),
                None => println!("  {:<4} {} ({} ms)", marker, step.name, step.duration.as_millis()),
            }
            if let Some(diagnostics) = &step.diagnostics {
                if let Some(path) = &diagnostics.screenshot {
                    println!("       screenshot: {}", path.display());
                }
                if let Some(path) = &diagnostics.page_source {
                    println!("       page source: {}", path.display());
                }
            }
        }
    }
    println!(
        "\n{} sessions: {} passed, {} failed, {} errored in {:.1}s",
        summary.total,
        summary.passed,
        summary.failed,
        summary.errored,
        summary.wall_time.as_secs_f64()
    );
}
