//! dbtrunner CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline once, now
//! dbtrunner run
//!
//! # Preview the rendered steps
//! dbtrunner run --dry-run
//!
//! # Fail fast while debugging
//! dbtrunner run --retries 0
//!
//! # Run daily at 03:00 UTC until Ctrl-C
//! dbtrunner schedule
//!
//! # Inspect the definition, upcoming fire times, and the last run
//! dbtrunner show --format json
//! dbtrunner next --count 3
//! dbtrunner status
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::info;

use dbtrunner::config::{load_env_file, PipelineEnv};
use dbtrunner::execution::{next_fire_time, Engine, Scheduler};
use dbtrunner::monitoring::RunTimeline;
use dbtrunner::workflow::{
    dbt_pipeline, CronSchedule, RunLock, RunReport, RunTrigger, TaskState, Workflow, WorkflowState,
    DEFAULT_STATE_DIR,
};
use dbtrunner::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "dbtrunner")]
#[command(version)]
#[command(about = "Sync a dbt project and run deps + build on a schedule", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dotenv file to load (default: .env in the working directory, if present)
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Directory for run state and the scheduler lock
    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run now
    Run {
        /// Print each step without executing it
        #[arg(long)]
        dry_run: bool,
        /// Retries per failing step (default: 1)
        #[arg(long, value_name = "N")]
        retries: Option<u32>,
        /// Delay between attempts, e.g. `30s` or `5m` (default: 5m)
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        retry_delay: Option<Duration>,
    },
    /// Run on the pipeline's schedule until Ctrl-C
    Schedule,
    /// Print the pipeline definition
    Show {
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
    /// Print upcoming fire times
    Next {
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Print the last recorded run
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Scheduled dbt Pipeline Runner");
    println!();
}

fn load_pipeline(env_file: Option<&Path>) -> Result<Workflow, Box<dyn std::error::Error>> {
    load_env_file(env_file)?;
    Ok(dbt_pipeline(&PipelineEnv::from_env())?)
}

fn colored_state(state: TaskState) -> colored::ColoredString {
    let label = format!("{:?}", state);
    match state {
        TaskState::Success => label.green(),
        TaskState::Failed => label.red(),
        TaskState::UpstreamFailed => label.yellow(),
        _ => label.normal(),
    }
}

/// Prints per-step results followed by the timeline chart.
fn print_summary(report: &RunReport, timeline: Option<&RunTimeline>) {
    println!();
    println!("Run {}", report.run_id.bold());
    for task in &report.tasks {
        let duration = task
            .duration()
            .and_then(|d| d.to_std().ok())
            .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<18} {:<16} attempts: {}  duration: {}",
            task.step_id,
            colored_state(task.state),
            task.try_number,
            duration
        );
        if let Some(err) = &task.error {
            println!("  {:<18} {}", "", err.dimmed());
        }
    }

    if let Some(timeline) = timeline {
        print!("{}", timeline.chart());
    }

    println!();
    if report.succeeded() {
        println!("{}", "Pipeline completed successfully".green().bold());
    } else {
        println!("{}", "Pipeline failed".red().bold());
    }
}

fn run_once(
    cli: &Cli,
    dry_run: bool,
    retries: Option<u32>,
    retry_delay: Option<Duration>,
) -> Result<bool, Box<dyn std::error::Error>> {
    print_banner();
    if dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
    }

    let mut workflow = load_pipeline(cli.env_file.as_deref())?;
    if let Some(retries) = retries {
        workflow.retry_policy.retries = retries;
    }
    if let Some(delay) = retry_delay {
        workflow.retry_policy.retry_delay = delay;
    }
    info!(
        "Workflow '{}' loaded: {} steps, {} retries, {} retry delay",
        workflow.id,
        workflow.len(),
        workflow.retry_policy.retries,
        humantime::format_duration(workflow.retry_policy.retry_delay)
    );

    let workflow_id = workflow.id.clone();

    // Shared with the scheduler so a manual run never overlaps a scheduled one
    let _lock = if dry_run {
        None
    } else {
        Some(RunLock::acquire(&cli.state_dir, &workflow_id)?)
    };

    let mut engine = Engine::new(workflow);
    engine.set_dry_run(dry_run);

    let report = engine.run(Utc::now(), RunTrigger::Manual);
    print_summary(&report, Some(engine.timeline()));

    if !dry_run {
        let mut state = WorkflowState::load_or_new(&cli.state_dir, &workflow_id);
        state.record(&report);
        state.save(&cli.state_dir)?;
    }

    Ok(report.succeeded())
}

fn schedule(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    print_banner();

    let workflow = load_pipeline(cli.env_file.as_deref())?;
    info!(
        "Scheduling '{}' on '{}' (catch-up: {})",
        workflow.id, workflow.schedule, workflow.catchup
    );

    let scheduler = Scheduler::new(Engine::new(workflow), &cli.state_dir)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(scheduler.run_forever())?;

    info!("Scheduler stopped");
    Ok(())
}

fn show(cli: &Cli, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_pipeline(cli.env_file.as_deref())?;
    let rendered = match format {
        Format::Yaml => serde_yaml::to_string(&workflow)?,
        Format::Json => serde_json::to_string_pretty(&workflow)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn next(cli: &Cli, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_pipeline(cli.env_file.as_deref())?;
    let schedule = CronSchedule::parse(&workflow.schedule)?;

    let mut cursor = Utc::now();
    for _ in 0..count {
        let Some(fire) = next_fire_time(&workflow, &schedule, cursor) else {
            break;
        };
        println!("{}", fire.to_rfc3339());
        cursor = fire;
    }
    Ok(())
}

fn status(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_pipeline(cli.env_file.as_deref())?;
    let state = WorkflowState::load_or_new(&cli.state_dir, &workflow.id);

    match &state.last_scheduled {
        Some(date) => println!("Last scheduled run: {}", date.to_rfc3339()),
        None => println!("Last scheduled run: never"),
    }

    match &state.last_run {
        Some(report) => print_summary(report, None),
        None => println!("No runs recorded for '{}'", workflow.id),
    }
    Ok(())
}

/// Main application entry point.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Run { dry_run, retries, retry_delay } => {
            run_once(&cli, *dry_run, *retries, *retry_delay)
        }
        Commands::Schedule => schedule(&cli).map(|()| true),
        Commands::Show { format } => show(&cli, *format).map(|()| true),
        Commands::Next { count } => next(&cli, *count).map(|()| true),
        Commands::Status => status(&cli).map(|()| true),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
