use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stagehand::config::{split_search_path, Config};
use stagehand::orchestration::{ConcurrencyKind, Orchestrator, ThrottleController};
use stagehand::report::{self, OutputFormat};
use stagehand::{shlog, shlog_debug, Error, Result};

/// stagehand - dependency-aware bring-up of capability units
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    STAGEHAND_DEBUG=1           Enable debug logging (alternative to --debug)\n    STAGEHAND_LOG_LEVEL         error, warn, info, debug or trace\n    STAGEHAND_PROJECT_ROOT      Project root\n    STAGEHAND_UNITS_PATH        Units search path")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.stagehand/stagehand.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.stagehand/stagehand.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root that relative unit locations resolve against
    #[arg(long, global = true)]
    pub project_root: Option<String>,

    /// Units search path, separated like PATH
    #[arg(long, global = true)]
    pub units_path: Option<String>,

    /// Static registry file; without one the units path is scanned
    #[arg(long, global = true)]
    pub registry: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Activate units in dependency order and run the health check
    Init {
        /// Only required units and their dependencies
        #[arg(long)]
        required_only: bool,

        /// Re-activate units that are already active
        #[arg(long)]
        force: bool,

        /// Fixed per-group concurrency
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        concurrency: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show availability and activation state of every known unit
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Activate required units first
        #[arg(long)]
        init: bool,
    },

    /// Print the activation order
    Resolve {
        /// Restrict to these units and their dependencies
        units: Vec<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Treat optional dependencies as ordering edges
        #[arg(long)]
        include_optional: bool,

        /// Fail on cycles or unknown unit names
        #[arg(long)]
        strict: bool,
    },

    /// Sample host resources and show concurrency recommendations
    Metrics {
        /// Only this workload kind
        #[arg(long)]
        kind: Option<ConcurrencyKind>,

        /// Measure I/O wait over a short interval
        #[arg(long)]
        detailed: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    stagehand::log::init_with_debug(cli.debug);
    shlog!("stagehand starting: {:?}", cli.command);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Init {
            required_only,
            force,
            concurrency,
            json,
        } => {
            let concurrency = concurrency.map(|c| c as usize).or(config.concurrency);
            let healthy = run_init(&config, required_only, force, concurrency, json)?;
            if !healthy {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Status { format, init } => run_status(&config, format, init),
        Command::Resolve {
            units,
            format,
            include_optional,
            strict,
        } => run_resolve(&config, units, format, include_optional, strict),
        Command::Metrics { kind, detailed } => run_metrics(&config, kind, detailed),
    }
}

/// File, then environment, then flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    if let Some(root) = &cli.project_root {
        config.project_root = Some(root.clone());
    }
    if let Some(paths) = &cli.units_path {
        config.units_path = split_search_path(paths);
    }
    if let Some(registry) = &cli.registry {
        config.registry = Some(registry.clone());
    }
    config.validate()?;
    shlog_debug!("Effective config: {:?}", config);
    Ok(config)
}

fn run_init(
    config: &Config,
    required_only: bool,
    force: bool,
    concurrency: Option<usize>,
    json: bool,
) -> Result<bool> {
    let rt = tokio::runtime::Runtime::new()?;
    let mut orchestrator = Orchestrator::from_config(config)?;

    let healthy =
        rt.block_on(orchestrator.initialize_with_concurrency(required_only, force, concurrency));
    if let Some(report) = orchestrator.last_report() {
        print!("{}", report::render_report(report, json)?);
    }
    if !json {
        println!("{}", colorize(if healthy { "healthy" } else { "unhealthy" }, healthy));
        if let Some(health) = orchestrator.last_health() {
            for name in &health.missing_required {
                println!("  required unit not active: {}", name);
            }
        }
    }
    Ok(healthy)
}

fn run_status(config: &Config, format: OutputFormat, init: bool) -> Result<()> {
    let mut orchestrator = Orchestrator::from_config(config)?;
    if init {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(orchestrator.initialize(true, false));
    }
    print!("{}", report::render_status(&orchestrator.get_status(), format)?);
    Ok(())
}

fn run_resolve(
    config: &Config,
    units: Vec<String>,
    format: OutputFormat,
    include_optional: bool,
    strict: bool,
) -> Result<()> {
    let mut orchestrator = Orchestrator::from_config(config)?
        .with_optional_dependencies(include_optional || config.include_optional);
    if strict {
        let graph = orchestrator.graph()?;
        if let Some(unknown) = units.iter().find(|name| !graph.contains(name)) {
            return Err(Error::UnitNotFound(unknown.clone()));
        }
    }
    let subset = (!units.is_empty()).then_some(units);
    let order = orchestrator.resolve(subset.as_deref())?;
    if strict {
        order.ensure_acyclic()?;
    }
    let graph = orchestrator.graph()?;
    print!("{}", report::render_resolved(&order, graph, format)?);
    Ok(())
}

fn run_metrics(config: &Config, kind: Option<ConcurrencyKind>, detailed: bool) -> Result<()> {
    let throttle = ThrottleController::new().with_ttl(config.recommendation_ttl());
    let snapshot = throttle.sample(detailed);
    let kinds: Vec<ConcurrencyKind> = match kind {
        Some(kind) => vec![kind],
        None => ConcurrencyKind::ALL.to_vec(),
    };
    let recommendations: Vec<_> = kinds.into_iter().map(|k| throttle.recommend(k)).collect();
    print!(
        "{}",
        report::render_metrics(&snapshot, &recommendations, throttle.is_automated())
    );
    Ok(())
}

fn colorize(text: &str, ok: bool) -> String {
    if ok {
        format!("\x1b[32m{}\x1b[0m", text) // Green
    } else {
        format!("\x1b[31m{}\x1b[0m", text) // Red
    }
}
