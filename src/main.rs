use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use pollstream::config::Config;
use pollstream::query::http::HttpExecutor;
use pollstream::query::QueryRequest;
use pollstream::scheduler::StreamScheduler;
use pollstream::template::TemplateVars;

/// Streams periodic datasource query results as live frames.
#[derive(Parser)]
#[command(name = "pollstream", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("pollstream {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting pollstream");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
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

    // Substitute template variables into query payloads up front.
    let vars = TemplateVars::new(cfg.variables.clone());
    let subscriptions = cfg
        .subscriptions
        .iter()
        .map(|sub| vars.apply(sub))
        .collect();

    let executor = Arc::new(HttpExecutor::new(&cfg.endpoint).context("building query executor")?);
    let (scheduler, mut emissions) = StreamScheduler::new(executor);

    // Print each emission as one JSON line.
    let printer = tokio::spawn(async move {
        while let Some(emission) = emissions.recv().await {
            match serde_json::to_string(&emission) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "serializing emission"),
            }
        }
    });

    let handle = scheduler
        .start(QueryRequest::new(subscriptions))
        .context("starting stream")?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    handle.cancel();
    scheduler.shutdown();
    drop(scheduler);

    printer.await.context("joining emission printer")?;

    tracing::info!("pollstream stopped");

    Ok(())
}
