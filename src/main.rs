use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use stakewatch::{config, daemon, rank, report, source};

/// Staking network node-ranking and metrics daemon.
#[derive(Parser)]
#[command(name = "stakewatch", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides the config file when set.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the metrics daemon (the default when no subcommand is given).
    Serve,

    /// Fetch current network state and print a one-shot CSV report.
    Report {
        #[arg(value_enum)]
        target: ReportTarget,
    },

    /// Print version information and exit.
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportTarget {
    /// All registered nodes ranked by score.
    Nodes,
    /// Active staking minipools sorted by balance.
    Minipools,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("stakewatch {}", version::full());
        return Ok(());
    }

    // Config is required for everything past `version`.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = config::Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // Initialize tracing; the CLI flag wins over the config file.
    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        Some(Command::Report { target }) => rt.block_on(run_report(cfg, target)),
        Some(Command::Serve) | None => {
            tracing::info!(
                version = version::RELEASE,
                commit = version::git_commit(),
                "starting stakewatch",
            );
            rt.block_on(run(cfg))
        }
        Some(Command::Version) => unreachable!(),
    }
}

async fn run(cfg: config::Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    // Start the daemon.
    let daemon = daemon::Daemon::new(cfg);
    daemon.start().await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    daemon.stop().await?;

    tracing::info!("stakewatch stopped");

    Ok(())
}

/// One-shot report: fetch, rank, print, exit.
async fn run_report(cfg: config::Config, target: ReportTarget) -> Result<()> {
    use stakewatch::source::StakingSource;

    let client = source::Client::new(&cfg.source).context("creating source client")?;

    match target {
        ReportTarget::Nodes => {
            let (minipools, addresses) = tokio::try_join!(
                client.minipool_details(),
                client.node_addresses(),
            )?;
            let standings = rank::rank_nodes(
                &minipools,
                &addresses,
                cfg.scoring.top_k,
                cfg.scoring.policy,
            );
            print!("{}", report::render_nodes(&standings, cfg.scoring.policy));
        }
        ReportTarget::Minipools => {
            let minipools = client.minipool_details().await?;
            print!("{}", report::render_minipools(&minipools));
        }
    }

    Ok(())
}
