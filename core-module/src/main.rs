use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use core_module::config::Config;
use core_module::server::Supervisor;

/// Local DNS resolver and ad/tracker blocker.
#[derive(Debug, Parser)]
#[command(name = "shieldns", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Overrides the `RUST_LOG`-style filter used to initialize tracing.
    #[arg(long, default_value = "info")]
    log_filter: String,

    /// Load and validate the configuration, print a summary, and exit
    /// without binding a socket.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_config {
        println!(
            "config OK: listening on {}, {} static entries, {} blocklist sources, external={}",
            config.endpoint.address,
            config.custom.len(),
            config.blocking_lists.len(),
            config.allow_external,
        );
        return ExitCode::SUCCESS;
    }

    let supervisor = match Supervisor::start(config).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!(error = %err, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("shieldns started");
    if let Err(err) = supervisor.run_until_signal().await {
        tracing::error!(error = %err, "error while waiting for shutdown signal");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
