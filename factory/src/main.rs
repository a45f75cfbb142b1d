//! `factory` CLI: orchestrate goals, manage local deployments, serve artifacts.
//!
//! State lives under `<root>/.factory/` (config, run and deployment catalogs,
//! memory). Every command prints JSON to stdout.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use factory::app::Factory;
use factory::core::types::RunStatus;
use factory::deployer::DeployRequest;
use factory::exit_codes;
use factory::io::artifact;
use factory::logging;
use factory::orchestrator::RunRequest;

#[derive(Parser)]
#[command(
    name = "factory",
    version,
    about = "Attempt-based repair loop with a local deployment supervisor"
)]
struct Cli {
    /// Project root holding `.factory/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a goal through plan, execute, evaluate and repair.
    Run {
        #[arg(long)]
        goal: String,
        /// Attempt budget; non-positive or absent uses the configured default.
        #[arg(long, allow_negative_numbers = true)]
        max_attempts: Option<i64>,
        /// Deploy the result (forced best-effort deploy if the run fails).
        #[arg(long)]
        deploy: bool,
    },
    /// Show one run.
    Status { run_id: u64 },
    /// List recent runs, newest first.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Package and launch a deployment for a goal.
    Deploy {
        #[arg(long)]
        goal: String,
        /// Run this deployment is attributed to.
        #[arg(long)]
        run_id: Option<u64>,
    },
    /// Show a deployment and whether its process is alive.
    DeployStatus { id: u64 },
    /// Stop a deployment and mark it stopped.
    Rollback { id: u64 },
    /// List recent deployments, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Poll a deployment's liveness endpoint until it answers or times out.
    Verify {
        id: u64,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Restart dead deployments, once or until interrupted.
    Watchdog {
        #[arg(long)]
        once: bool,
    },
    /// Launch N deployments concurrently, verify, and clean up.
    Stress {
        #[arg(short, long, default_value_t = 5)]
        n: usize,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Serve a packaged artifact (used as the deployment process).
    ServeArtifact {
        #[arg(long)]
        artifact: PathBuf,
        #[arg(long)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Command::ServeArtifact { .. } => "info",
        _ => "warn",
    };
    logging::init(default_filter);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    if let Command::ServeArtifact { artifact, port } = &cli.command {
        artifact::serve(artifact, *port).await?;
        return Ok(exit_codes::OK);
    }

    let factory = Factory::open(&cli.root)?;
    match cli.command {
        Command::Run {
            goal,
            max_attempts,
            deploy,
        } => {
            let outcome = factory
                .orchestrator
                .run(RunRequest {
                    goal,
                    max_attempts,
                    deploy,
                })
                .await?;
            print_json(&outcome)?;
            Ok(if outcome.status == RunStatus::Failed {
                exit_codes::RUN_FAILED
            } else {
                exit_codes::OK
            })
        }
        Command::Status { run_id } => ok_json(&factory.orchestrator.status(run_id)?),
        Command::History { limit } => ok_json(&factory.orchestrator.history(limit)?),
        Command::Deploy { goal, run_id } => {
            let outcome = factory
                .deployer
                .deploy(DeployRequest {
                    goal,
                    source_run_id: run_id,
                })
                .await?;
            ok_json(&outcome)
        }
        Command::DeployStatus { id } => ok_json(&factory.deployer.status(id)?),
        Command::Rollback { id } => ok_json(&factory.deployer.rollback(id).await?),
        Command::List { limit } => ok_json(&factory.deployer.list(limit)?),
        Command::Verify { id, timeout_secs } => {
            let report = factory
                .deployer
                .verify(id, timeout_secs.map(Duration::from_secs))
                .await?;
            print_json(&report)?;
            Ok(if report.ready {
                exit_codes::OK
            } else {
                exit_codes::NOT_READY
            })
        }
        Command::Watchdog { once } => {
            let watchdog = factory.watchdog();
            if once {
                return ok_json(&watchdog.tick().await?);
            }
            let handle = watchdog.start();
            tokio::signal::ctrl_c()
                .await
                .context("wait for interrupt")?;
            info!("interrupt received, stopping watchdog");
            handle.shutdown().await;
            Ok(exit_codes::OK)
        }
        Command::Stress { n, timeout_secs } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| factory.config.ready_timeout());
            ok_json(&factory.stress().run(n, timeout).await?)
        }
        Command::ServeArtifact { .. } => Ok(exit_codes::OK),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn ok_json<T: Serialize>(value: &T) -> Result<i32> {
    print_json(value)?;
    Ok(exit_codes::OK)
}
