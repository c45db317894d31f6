//! `ira` command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ira_core::prelude::*;
use ira_core::{agent_dependency, SeededExecutor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "ira", version, about = "IRA resilience core")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a seeded end-to-end scenario and print the dashboards as JSON
    Simulate {
        /// Incidents to route; each passes through every agent type
        #[arg(long, default_value_t = 20)]
        incidents: u64,

        /// Seed for agent outcomes
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Fraction of agent calls that fail
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        /// Fail half of the diagnosis calls for the first 30s
        #[arg(long)]
        chaos: bool,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate a TOML config file
    CheckConfig {
        /// File to check
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json)?;

    match cli.command {
        Command::Simulate {
            incidents,
            seed,
            failure_rate,
            chaos,
            config,
        } => simulate(incidents, seed, failure_rate, chaos, config.as_deref()).await,
        Command::CheckConfig { path } => check_config(&path),
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

async fn simulate(incidents: u64, seed: u64, failure_rate: f64, chaos: bool, config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => CoreConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CoreConfig::default(),
    };
    let core = ResilienceCore::new(config, Arc::new(InMemoryProvisioner::new()))?;
    core.start();

    for agent_type in AgentType::ALL {
        let action = core.scaling().evaluate_scaling(agent_type).await?;
        info!(%agent_type, ?action, "initial pool");
    }
    if chaos {
        let experiment = core
            .chaos()
            .inject(FaultType::ExternalApiFailure, &agent_dependency(AgentType::Diagnosis), 30, 0.5)?;
        info!(experiment = %experiment.experiment_id, "chaos experiment running");
    }

    let executor = SeededExecutor::new(seed, failure_rate);
    let severities = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];
    let mut completed = 0_u64;
    let mut failed: BTreeMap<&'static str, u64> = BTreeMap::new();
    let phases = incidents * AgentType::ALL.len() as u64;
    let plan = (0..phases).zip(AgentType::ALL.into_iter().cycle());
    for ((n, agent_type), severity) in plan.zip(severities.into_iter().cycle()) {
        let incident = Incident::new(
            format!("inc-{seed}-{}", n / AgentType::ALL.len() as u64),
            "simulated incident",
            agent_type,
        )
        .with_severity(severity);
        match core.handle_incident(&incident, &executor).await {
            Ok(_) => completed += 1,
            Err(e) => {
                warn!(incident = %incident.incident_id, kind = %e.kind(), error = %e, "phase failed");
                *failed.entry(e.kind().as_str()).or_default() += 1;
            }
        }
    }

    let summary = serde_json::json!({
        "phases": phases,
        "completed": completed,
        "failed": failed,
        "status": core.status(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    core.shutdown().await;
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = CoreConfig::load(path).with_context(|| format!("checking {}", path.display()))?;
    println!(
        "{} is valid: {} regions, {} agent policies, breaker threshold {}",
        path.display(),
        config.scaling.regions.len(),
        config.scaling.policies.len(),
        config.breaker.failure_threshold,
    );
    Ok(())
}
