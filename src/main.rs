//! snapkv server binary
//!
//! Parses the command line, sets up logging, binds the listener and serves
//! until Ctrl+C.

use anyhow::Context;
use snapkv::config::{CliAction, ServerConfig, USAGE};
use snapkv::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
snapkv v{} - in-memory key-value server
──────────────────────────────────────────────
Listening on  {}
Snapshot      {}

Use Ctrl+C to shutdown gracefully.
"#,
        snapkv::VERSION,
        config.bind_address(),
        config.snapshot_path().display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("snapkv version {}", snapkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);
    info!(
        addr = %config.bind_address(),
        snapshot = %config.snapshot_path().display(),
        "Server started"
    );

    server
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
            }
            info!("Shutdown signal received, stopping server...");
        })
        .await;

    info!("Server shutdown complete");
    Ok(())
}
