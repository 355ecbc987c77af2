//! CLI command implementations for scenario-harness.
//!
//! Subcommands:
//! - `run`: replay scenarios against the agent, analyze and store the runs
//! - `improve`: bounded run → remediate loop for one scenario
//! - `validate`: parse and validate scenario files
//! - `analyze`: score an existing session directory
//! - `list` / `show` / `stats`: query the run store
//! - `export` / `import`: JSON interchange

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::analyzer::{AnalysisInput, Analyzer, Run};
use crate::config::HarnessConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{HarnessPipeline, ImprovementLoop, RunReport};
use crate::scenario::{discover_scenarios, Scenario};
use crate::storage::{export_json, import_json, RunFilter, RunStore};

/// Default number of runs shown by `list`.
const DEFAULT_LIST_LIMIT: u32 = 20;

/// scenario-harness: scenario-driven quality harness for agent CLIs.
#[derive(Parser)]
#[command(name = "scenario-harness")]
#[command(about = "Replays scripted scenarios against an agent CLI and scores the sessions")]
#[command(version)]
#[command(
    long_about = "scenario-harness drives an agent command-line program through multi-turn \
scenarios, supervises each prompt for completion, stuck loops and idle time, \
scores the session against the scenario's limits and stores the results in SQLite.\n\n\
Environment variables (HARNESS_*) configure defaults; flags override them."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Write Prometheus metrics to this file when the command finishes.
    #[arg(long, global = true, env = "HARNESS_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run scenarios against the agent and record the results.
    Run(RunArgs),

    /// Run a scenario repeatedly, remediating failures between iterations.
    Improve(ImproveArgs),

    /// Parse and validate scenario files without running them.
    Validate(ValidateArgs),

    /// Score an existing session directory against a scenario.
    Analyze(AnalyzeArgs),

    /// List stored runs, newest first.
    List(ListArgs),

    /// Show one stored run with its details.
    Show(ShowArgs),

    /// Per-scenario aggregates over the stored runs.
    Stats(StatsArgs),

    /// Export all stored runs to a JSON file.
    Export(ExportArgs),

    /// Import runs from a JSON file, skipping known sessions.
    Import(ImportArgs),
}

/// Options shared by every command that touches the run store.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// SQLite database file.
    #[arg(long = "db", env = "HARNESS_DB_PATH")]
    pub db_path: Option<PathBuf>,
}

/// Options controlling the agent process.
#[derive(clap::Args, Debug, Clone)]
pub struct AgentArgs {
    /// Agent executable.
    #[arg(long, env = "HARNESS_AGENT_BIN")]
    pub agent_bin: Option<String>,

    /// Agent session-state directory watched for new sessions.
    #[arg(long, env = "HARNESS_SESSION_DIR")]
    pub session_dir: Option<PathBuf>,

    /// Parent directory for per-run execution directories.
    #[arg(long, env = "HARNESS_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// Revision tag stored on each run.
    #[arg(long, env = "HARNESS_REVISION")]
    pub revision: Option<String>,

    /// WebDriver server used for browser verification steps.
    #[arg(long, env = "HARNESS_WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,

    /// Do not relay the agent's console output.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scenario files or directories containing them.
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,

    #[command(flatten)]
    pub agent: AgentArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the improve command.
#[derive(Parser, Debug)]
pub struct ImproveArgs {
    /// Scenario file.
    pub scenario: PathBuf,

    /// Maximum number of iterations.
    #[arg(short = 'n', long, env = "HARNESS_MAX_ITERATIONS")]
    pub iterations: Option<u32>,

    /// Directory holding the agent's instruction and skill assets.
    #[arg(long, env = "HARNESS_ASSETS_DIR")]
    pub assets_dir: Option<PathBuf>,

    /// Command rebuilding the agent after remediation is written.
    #[arg(long, env = "HARNESS_REBUILD_COMMAND")]
    pub rebuild_command: Option<String>,

    #[command(flatten)]
    pub agent: AgentArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the validate command.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Scenario files or directories containing them.
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,
}

/// Arguments for the analyze command.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Agent session directory containing the event log.
    pub session_dir: PathBuf,

    /// Scenario file supplying limits and regression rules.
    #[arg(short, long)]
    pub scenario: PathBuf,

    /// Console transcript to scan for regressions.
    #[arg(short, long)]
    pub transcript: Option<PathBuf>,

    /// Revision tag for the run.
    #[arg(long, env = "HARNESS_REVISION")]
    pub revision: Option<String>,

    /// Store the resulting run.
    #[arg(long)]
    pub save: bool,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the list command.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only runs of this scenario.
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Maximum number of runs.
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: u32,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the show command.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Run id.
    pub id: i64,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the stats command.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the export command.
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Destination JSON file.
    pub output: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments for the import command.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Source JSON file.
    pub input: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with parsed arguments.
pub async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    run_with_cli(cli).await
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let result = match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Improve(args) => run_improve_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Analyze(args) => run_analyze_command(args).await,
        Commands::List(args) => run_list_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::Stats(args) => run_stats_command(args).await,
        Commands::Export(args) => run_export_command(args).await,
        Commands::Import(args) => run_import_command(args).await,
    };

    if let Some(path) = &cli.metrics_file {
        std::fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }
    result
}

// ============================================================================
// Configuration
// ============================================================================

fn base_config() -> anyhow::Result<HarnessConfig> {
    HarnessConfig::from_env().context("Invalid HARNESS_* configuration")
}

fn apply_store_args(config: &mut HarnessConfig, args: &StoreArgs) {
    if let Some(path) = &args.db_path {
        config.db_path = path.clone();
    }
}

fn apply_agent_args(config: &mut HarnessConfig, args: &AgentArgs) {
    if let Some(bin) = &args.agent_bin {
        config.agent_bin = bin.clone();
    }
    if let Some(dir) = &args.session_dir {
        config.session_root = dir.clone();
    }
    if let Some(dir) = &args.work_root {
        config.work_root = dir.clone();
    }
    if args.revision.is_some() {
        config.revision = args.revision.clone();
    }
    if args.webdriver_url.is_some() {
        config.webdriver_url = args.webdriver_url.clone();
    }
    if args.quiet {
        config.echo_output = false;
    }
}

async fn open_store(args: &StoreArgs) -> anyhow::Result<RunStore> {
    let mut config = base_config()?;
    apply_store_args(&mut config, args);
    RunStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open run store {}", config.db_path.display()))
}

/// Expands directories into the scenario files they contain.
fn collect_scenario_paths(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = discover_scenarios(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            if found.is_empty() {
                warn!(dir = %input.display(), "No scenario files found");
            }
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    Scenario::load(path).with_context(|| format!("Failed to load scenario {}", path.display()))
}

// ============================================================================
// Run / Improve
// ============================================================================

#[derive(Debug, serde::Serialize)]
struct RunOutput<'a> {
    run_id: i64,
    run: &'a Run,
    endpoint: Option<&'a str>,
    skipped_prompts: usize,
    terminations: Vec<&'static str>,
}

impl<'a> From<&'a RunReport> for RunOutput<'a> {
    fn from(report: &'a RunReport) -> Self {
        Self {
            run_id: report.run_id,
            run: report.run(),
            endpoint: report.endpoint.as_deref(),
            skipped_prompts: report.execution.skipped_prompts,
            terminations: report
                .execution
                .prompts
                .iter()
                .map(|p| p.termination.label())
                .collect(),
        }
    }
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = base_config()?;
    apply_agent_args(&mut config, &args.agent);
    apply_store_args(&mut config, &args.store);
    if args.json {
        config.echo_output = false;
    }
    config.validate().context("Invalid configuration")?;

    let paths = collect_scenario_paths(&args.scenarios)?;
    let scenarios = paths
        .iter()
        .map(|p| load_scenario(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pipeline = HarnessPipeline::new(config)
        .await
        .context("Failed to initialize pipeline")?;

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        info!(scenario = %scenario.name, prompts = scenario.prompts.len(), "Running scenario");
        let report = pipeline
            .run_once(scenario, None)
            .await
            .with_context(|| format!("Scenario '{}' failed to run", scenario.name))?;
        reports.push(report);
    }

    if args.json {
        let output: Vec<RunOutput> = reports.iter().map(RunOutput::from).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n=== Run Results ===");
    for report in &reports {
        print_report(report);
    }
    let passed = reports.iter().filter(|r| r.passed()).count();
    println!("\n{}/{} scenarios passed", passed, reports.len());
    Ok(())
}

fn print_report(report: &RunReport) {
    let run = report.run();
    println!("\n#{} {}", report.run_id, run.summary());
    for prompt in &report.execution.prompts {
        println!(
            "  prompt {}: {} ({:.1}s){}",
            prompt.index + 1,
            prompt.termination.label(),
            prompt.elapsed.as_secs_f64(),
            if prompt.resumed { " resumed" } else { "" }
        );
    }
    if report.execution.skipped_prompts > 0 {
        println!(
            "  {} prompt(s) skipped at the scenario deadline",
            report.execution.skipped_prompts
        );
    }
    if let Some(endpoint) = &report.endpoint {
        println!("  endpoint: {endpoint}");
    }
    for step in report.verification.iter().filter(|s| !s.passed) {
        println!("  verification '{}' failed: {}", step.name, step.details);
    }
    for check in report.criteria.iter().filter(|c| !c.passed) {
        println!(
            "  prompt {} criterion not met: {}",
            check.prompt + 1,
            check.criterion
        );
    }
}

async fn run_improve_command(args: ImproveArgs) -> anyhow::Result<()> {
    let mut config = base_config()?;
    apply_agent_args(&mut config, &args.agent);
    apply_store_args(&mut config, &args.store);
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
    }
    if args.assets_dir.is_some() {
        config.assets_dir = args.assets_dir.clone();
    }
    if args.rebuild_command.is_some() {
        config.rebuild_command = args.rebuild_command.clone();
    }
    if args.json {
        config.echo_output = false;
    }
    config.validate().context("Invalid configuration")?;

    let scenario = load_scenario(&args.scenario)?;
    let pipeline = HarnessPipeline::new(config)
        .await
        .context("Failed to initialize pipeline")?;
    let outcome = ImprovementLoop::new(&pipeline)
        .run(&scenario)
        .await
        .with_context(|| format!("Improvement loop for '{}' failed", scenario.name))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("\n=== Improvement: {} ===", outcome.scenario);
    for it in &outcome.iterations {
        println!(
            "  iteration {}: run #{} score {:.1} {}",
            it.iteration,
            it.run_id,
            it.score,
            if it.passed { "PASS" } else { "FAIL" }
        );
        if let Some(path) = &it.remediation_file {
            println!("    remediation written to {}", path.display());
        }
    }
    println!(
        "\n{} after {} iteration(s)",
        if outcome.passed { "Passed" } else { "Not passing" },
        outcome.iterations.len()
    );
    Ok(())
}

// ============================================================================
// Validate / Analyze
// ============================================================================

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let paths = collect_scenario_paths(&args.scenarios)?;
    let mut failures = 0usize;

    for path in &paths {
        match Scenario::load(path) {
            Ok(scenario) => println!(
                "✓ {} ({}: {} prompts, {} verification steps)",
                path.display(),
                scenario.name,
                scenario.prompts.len(),
                scenario.verification.len()
            ),
            Err(e) => {
                failures += 1;
                println!("✗ {}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} scenario file(s) invalid", failures, paths.len());
    }
    Ok(())
}

async fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let mut config = base_config()?;
    apply_store_args(&mut config, &args.store);
    if args.revision.is_some() {
        config.revision = args.revision.clone();
    }

    let scenario = load_scenario(&args.scenario)?;
    let analyzer = Analyzer::new(config.analyzer_config()).context("Invalid analyzer patterns")?;

    let mut input =
        AnalysisInput::from_session_dir(&args.session_dir).with_revision(config.revision.clone());
    if let Some(transcript) = &args.transcript {
        input = input.with_transcript(transcript);
    }
    let mut analysis = analyzer
        .analyze(&scenario, &input)
        .with_context(|| format!("Failed to analyze {}", args.session_dir.display()))?;

    if args.save {
        let store = RunStore::open(&config.db_path)
            .await
            .with_context(|| format!("Failed to open run store {}", config.db_path.display()))?;
        let id = store.insert_run(&analysis.run).await?;
        analysis.run.id = Some(id);
        info!(run_id = id, "Run stored");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis.run)?);
        return Ok(());
    }

    println!("{}", analysis.run.summary());
    for c in &analysis.scorecard.contributions {
        println!(
            "  {:<24} {:>5.1}/{:<5.1} observed {} limit {}",
            c.name, c.earned, c.weight, c.observed, c.limit
        );
    }
    Ok(())
}

// ============================================================================
// Store queries
// ============================================================================

async fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store).await?;
    let mut filter = RunFilter::new().limit(args.limit);
    if let Some(scenario) = &args.scenario {
        filter = filter.scenario(scenario);
    }
    let runs = store.list_runs(&filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in &runs {
        println!(
            "#{:<5} {}  {}",
            run.id.unwrap_or_default(),
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.summary()
        );
    }
    Ok(())
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store).await?;
    let run = store
        .get_run(args.id)
        .await
        .with_context(|| format!("Run #{} not found", args.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!("Run #{}", args.id);
    println!("  Scenario:     {}", run.scenario);
    println!("  Session:      {}", run.session_id);
    if let Some(revision) = &run.revision {
        println!("  Revision:     {revision}");
    }
    println!("  Started:      {}", run.started_at.to_rfc3339());
    println!("  Duration:     {:.1} min", run.duration_minutes());
    println!("  Turns:        {}", run.turns);
    println!("  Deploy calls: {}", run.deploy_calls);
    println!("  Infra edits:  {}", run.infra_edits);
    println!("  Delegated:    {}", run.delegated);
    println!("  Deployed:     {}", run.deployed);
    println!(
        "  Score:        {:.1} ({})",
        run.score,
        if run.passed { "PASS" } else { "FAIL" }
    );
    if !run.skills.is_empty() {
        println!("  Skills:");
        for (skill, invoked) in &run.skills {
            println!("    {} {}", if *invoked { "✓" } else { "✗" }, skill);
        }
    }
    if !run.regressions.is_empty() {
        println!("  Regressions:");
        for (name, r) in &run.regressions {
            println!(
                "    {} {}: {} (limit {})",
                if r.passed { "✓" } else { "✗" },
                name,
                r.occurrences,
                r.limit
            );
        }
    }
    if !run.verification.is_empty() {
        println!("  Verification:");
        for (name, step) in &run.verification {
            println!(
                "    {} {}: {}",
                if step.passed { "✓" } else { "✗" },
                name,
                step.details
            );
        }
    }
    Ok(())
}

async fn run_stats_command(args: StatsArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store).await?;
    let stats = store.scenario_stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:<28} {:>5} {:>6} {:>7} {:>6}",
        "scenario", "runs", "pass%", "avg", "best"
    );
    for s in &stats {
        println!(
            "{:<28} {:>5} {:>5.0}% {:>7.1} {:>6.1}",
            s.scenario,
            s.runs,
            s.pass_rate() * 100.0,
            s.average_score,
            s.best_score
        );
    }
    Ok(())
}

async fn run_export_command(args: ExportArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store).await?;
    let count = export_json(&store, &args.output)
        .await
        .with_context(|| format!("Failed to export to {}", args.output.display()))?;
    println!("✓ Exported {} run(s) to {}", count, args.output.display());
    Ok(())
}

async fn run_import_command(args: ImportArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store).await?;
    let summary = import_json(&store, &args.input)
        .await
        .with_context(|| format!("Failed to import {}", args.input.display()))?;
    println!(
        "✓ Imported {} run(s), skipped {} already present",
        summary.imported, summary.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "scenario-harness",
            "run",
            "scenarios/",
            "--agent-bin",
            "fake-agent",
            "--db",
            "/tmp/runs.db",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.scenarios, vec![PathBuf::from("scenarios/")]);
                assert_eq!(args.agent.agent_bin.as_deref(), Some("fake-agent"));
                assert_eq!(args.store.db_path, Some(PathBuf::from("/tmp/runs.db")));
                assert!(args.json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_agent_args_override_config() {
        let mut config = HarnessConfig::default();
        let args = AgentArgs {
            agent_bin: Some("other".to_string()),
            session_dir: Some(PathBuf::from("/s")),
            work_root: None,
            revision: Some("abc123".to_string()),
            webdriver_url: None,
            quiet: true,
        };
        apply_agent_args(&mut config, &args);
        assert_eq!(config.agent_bin, "other");
        assert_eq!(config.session_root, PathBuf::from("/s"));
        assert_eq!(config.revision.as_deref(), Some("abc123"));
        assert!(!config.echo_output);
    }

    #[test]
    fn test_collect_scenario_paths_expands_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "name: a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let single = PathBuf::from("b.yaml");

        let paths = collect_scenario_paths(&[dir.path().to_path_buf(), single.clone()]).unwrap();
        assert_eq!(paths, vec![dir.path().join("a.yaml"), single]);
    }
}
