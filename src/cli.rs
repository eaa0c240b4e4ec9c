use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::audit_trail::AuditTrail;
use crate::cipher::{generate_base64_key, SecretCipher};
use crate::config_loader::{load_config, GatewayConfig};
use crate::gateway::build_router;

/// Top-level CLI interface for the gateway
#[derive(Parser)]
#[command(
    name = "capability-gateway",
    version,
    about = "Audited capability invocation gateway"
)]
pub struct Cli {
    /// Configuration file (defaults to ./gateway.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API until Ctrl-C
    Serve {
        /// Host/IP to bind, overrides configuration
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides configuration
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the built-in capabilities
    Capabilities,

    /// Print a fresh base64 cipher secret
    Keygen,

    /// Print the most recent audit events from the primary log
    AuditTail {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Installs the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Keygen => {
            println!("{}", generate_base64_key());
            Ok(())
        }
        Commands::Serve { host, port } => {
            let mut config = load(cli.config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;
            serve(config)
        }
        Commands::Capabilities => {
            let config = load(cli.config.as_deref())?;
            // Listing needs the handlers wired, not a real key or store.
            let cipher = Arc::new(SecretCipher::from_base64(&generate_base64_key())?);
            let trail = Arc::new(AuditTrail::unavailable("listing only"));
            let state = AppState::new(config, cipher, trail);
            for info in state.registry().list() {
                println!("{:<30} {:<9} {}", info.name, info.classification, info.description);
            }
            Ok(())
        }
        Commands::AuditTail { limit } => {
            let config = load(cli.config.as_deref())?;
            let trail = AuditTrail::open_at(&config.store_path, config.audit_retention_days)
                .with_context(|| {
                    format!(
                        "audit store at {} is not available (is the server holding it?)",
                        config.store_path.display()
                    )
                })?;
            for event in trail.recent(limit)? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
    }
}

fn load(path: Option<&std::path::Path>) -> anyhow::Result<GatewayConfig> {
    let config = load_config(path).context("failed to load configuration")?;
    init_tracing(&config.log_level);
    Ok(config)
}

fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config).context("failed to initialize gateway")?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    let served = rt.block_on(run_server(state.clone()));
    state.audit().close();
    info!("audit trail closed");
    served
}

async fn run_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "capability gateway listening");

    let sweeper = tokio::spawn(sweep_index(state.clone()));
    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();

    served.context("server error")
}

/// Periodically drops expired secondary-index entries.
async fn sweep_index(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.index_sweep_interval());
    loop {
        ticker.tick().await;
        let audit = state.audit().clone();
        match tokio::task::spawn_blocking(move || audit.purge_expired()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "index sweep skipped"),
            Err(e) => error!(error = %e, "index sweep task failed"),
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::parse_from([
            "capability-gateway",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "9999",
            "--config",
            "alt.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9999));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn audit_tail_has_default_limit() {
        let cli = Cli::parse_from(["capability-gateway", "audit-tail"]);
        assert!(matches!(cli.command, Commands::AuditTail { limit: 20 }));
    }
}
