#![warn(missing_docs)]
//! FluxStress CLI Library
//!
//! This crate provides the controller side of the stress harness: the
//! configuration file, the run planner, the worker supervisor and the
//! executor pipeline that turns a plan into a report. Use
//! `fluxstress_cli::run()` in a main function to get the full command line.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     match fluxstress_cli::run() {
//!         Ok(code) => std::process::ExitCode::from(code as u8),
//!         Err(e) => {
//!             eprintln!("Error: {:#}", e);
//!             std::process::ExitCode::FAILURE
//!         }
//!     }
//! }
//! ```

mod config;
mod executor;
mod planner;
mod supervisor;

pub use config::*;
pub use executor::{
    Executor, StressorRun, StressorStatistics, build_report, build_report_meta, compute_statistics,
    format_human_output, verify_run,
};
pub use planner::*;
pub use supervisor::*;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fluxstress_core::{Class, STRESSORS, VerifyMode, find};
use fluxstress_report::{OutputFormat, Report, generate_json_report, generate_yaml_report};
use fluxstress_shm::Region;
use regex::Regex;
use std::path::PathBuf;
use std::time::Instant;

/// FluxStress CLI arguments
#[derive(Parser, Debug)]
#[command(name = "fluxstress")]
#[command(author, version, about = "FluxStress - process-supervised stress harness")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Optional subcommand (run, list, info, config); defaults to run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Arguments for the default run command
    #[command(flatten)]
    pub run: RunArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run stressors (default)
    Run(RunArgs),
    /// List the shipped stressors
    List,
    /// Show a stressor's classes, options and verification support
    Info {
        /// Stressor name
        stressor: String,
    },
    /// Print a default fluxstress.toml
    Config,
}

/// Selection, limits and output options of a run
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Stressors to run
    pub stressors: Vec<String>,

    /// Run every stressor (pathological ones only with --pathological)
    #[arg(long)]
    pub all: bool,

    /// Run every stressor of this class (repeatable)
    #[arg(long)]
    pub class: Vec<String>,

    /// Only run stressors whose name matches this regex
    #[arg(long)]
    pub filter: Option<String>,

    /// Instances per stressor, 0 = one per online CPU
    #[arg(short = 'n', long)]
    pub instances: Option<u32>,

    /// Time limit (e.g. "10s", "2m"); "0" disables it
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Bogo-op limit per instance, 0 = unbounded
    #[arg(long)]
    pub ops: Option<u64>,

    /// Run stressors one after another instead of all at once
    #[arg(long)]
    pub sequential: bool,

    /// Verify results where a stressor supports it
    #[arg(long)]
    pub verify: bool,

    /// Allow pathological stressors in --all and --class selections
    #[arg(long)]
    pub pathological: bool,

    /// Stressor option as name=value (repeatable)
    #[arg(long = "opt", value_name = "NAME=VALUE")]
    pub options: Vec<String>,

    /// Output format: human, json, yaml
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write a YAML dump to this path
    #[arg(long)]
    pub yaml: Option<PathBuf>,
}

/// Run the FluxStress CLI with the process arguments.
///
/// # Returns
/// The process exit code: 1 when any instance failed, 7 when none failed
/// but some instance has untrustworthy metrics, 0 otherwise.
pub fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the FluxStress CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    // Initialize logging
    let filter = if cli.verbose { "fluxstress=debug" } else { "fluxstress=info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    // Discover fluxstress.toml configuration (CLI flags override)
    let config = FluxStressConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::List) => {
            list_stressors();
            Ok(0)
        }
        Some(Commands::Info { ref stressor }) => {
            show_info(stressor)?;
            Ok(0)
        }
        Some(Commands::Config) => {
            print!("{}", FluxStressConfig::default_toml());
            Ok(0)
        }
        Some(Commands::Run(ref args)) => run_stressors(args, &config),
        None => run_stressors(&cli.run, &config),
    }
}

fn list_stressors() {
    println!("FluxStress stressors:");
    for def in STRESSORS {
        let classes: Vec<&str> = def.classes.iter().map(|c| c.name()).collect();
        println!("├── {:<10} [{}] {}", def.name, classes.join(", "), def.help);
    }
    println!("{} stressors.", STRESSORS.len());

    let classes: Vec<String> = Class::ALL
        .iter()
        .map(|&class| {
            let count = STRESSORS.iter().filter(|s| s.has_class(class)).count();
            format!("{} ({})", class, count)
        })
        .collect();
    println!("Classes: {}", classes.join(", "));
}

fn show_info(name: &str) -> anyhow::Result<()> {
    let def = find(name).ok_or_else(|| anyhow::anyhow!("Unknown stressor: {}", name))?;
    let classes: Vec<&str> = def.classes.iter().map(|c| c.name()).collect();
    println!("{}: {}", def.name, def.help);
    println!("  classes: {}", classes.join(", "));
    println!(
        "  verify:  {}",
        match def.verify {
            VerifyMode::None => "not supported",
            VerifyMode::Optional => "with --verify",
            VerifyMode::Always => "always",
        }
    );
    if let Err(reason) = def.kind.supported() {
        println!("  unsupported here: {}", reason);
    }
    if def.options.is_empty() {
        println!("  no options");
    }
    for option in def.options {
        println!("  --opt {}=<{:?}> (default {}) {}", option.name, option.kind, option.default, option.help);
    }
    Ok(())
}

/// Build the selection and plan request by layering fluxstress.toml → CLI flags.
fn build_request(args: &RunArgs, config: &FluxStressConfig) -> anyhow::Result<(Selection, PlanRequest)> {
    let classes = args
        .class
        .iter()
        .map(|c| c.parse::<Class>())
        .collect::<Result<Vec<_>, _>>()?;
    let filter = args
        .filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --filter pattern")?;

    let selection = Selection {
        names: args.stressors.clone(),
        all: args.all,
        classes,
        filter,
        pathological: args.pathological || config.run.pathological,
    };

    let timeout = match &args.timeout {
        Some(t) => parse_timeout(t)?,
        None => config.run.timeout()?,
    };
    let mut options = config.options.clone();
    options.extend(parse_option_args(args.options.iter().map(String::as_str))?);

    let request = PlanRequest {
        instances: args.instances.unwrap_or(config.run.instances),
        ops: args.ops.unwrap_or(config.run.ops),
        timeout,
        verify: args.verify || config.run.verify,
        options,
        mode: if args.sequential {
            ExecutionMode::Sequential
        } else {
            config.run.mode
        },
    };
    Ok((selection, request))
}

/// Execute a plan end to end and build its report.
///
/// Creates the shared state region sized to the plan; failing to create it
/// is the only error that aborts a run.
pub fn run_stress(plan: &RunPlan, config: &SupervisorConfig) -> Result<Report, SupervisorError> {
    let start = Instant::now();
    let region = Region::create(plan.total_instances())?;
    tracing::debug!(bytes = region.size(), slots = region.capacity(), "shared state region mapped");

    let executor = Executor::new(config.clone());
    let runs = executor.execute(plan, &region);
    let report = build_report(plan, &region, &runs, start.elapsed().as_secs_f64());

    let tallies = region.tallies().snapshot();
    tracing::debug!(
        started = tallies.started,
        exited = tallies.exited,
        reaped = tallies.reaped,
        failed = tallies.failed,
        "run finished"
    );
    Ok(report)
}

fn run_stressors(args: &RunArgs, config: &FluxStressConfig) -> anyhow::Result<i32> {
    let format: OutputFormat = args
        .format
        .as_deref()
        .unwrap_or(&config.output.format)
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let (selection, request) = build_request(args, config)?;
    let plan = build_plan(&selection, &request)?;
    let supervisor = config.supervisor.to_config()?;

    tracing::info!(
        stressors = plan.entries.len(),
        instances = plan.total_instances(),
        mode = plan.mode.label(),
        "starting run"
    );

    install_controller_handlers();
    let report = run_stress(&plan, &supervisor).context("run aborted")?;

    let output = match format {
        OutputFormat::Human => format_human_output(&report),
        OutputFormat::Json => generate_json_report(&report)?,
        OutputFormat::Yaml => generate_yaml_report(&report)?,
    };
    match &args.output {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("cannot write report to {}", path.display()))?,
        None => print!("{}", output),
    }

    let yaml_path = args.yaml.clone().or_else(|| config.output.yaml.as_ref().map(PathBuf::from));
    if let Some(path) = yaml_path {
        std::fs::write(&path, generate_yaml_report(&report)?)
            .with_context(|| format!("cannot write YAML dump to {}", path.display()))?;
        tracing::info!("YAML dump written to {}", path.display());
    }

    Ok(report.summary.exit_code())
}
