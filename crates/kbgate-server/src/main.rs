//! kbgate runtime server
//!
//! Serves the agent runtime contract on port 8080:
//! - `POST /invocations` runs the knowledge base agent for the caller's tenant
//! - `GET /ping` reports `Healthy` / `HealthyBusy`
//! - `POST /retrieve` runs a tenant-scoped knowledge base search
//!
//! Usage:
//! ```bash
//! KNOWLEDGE_BASE_ID=KB123 ANTHROPIC_API_KEY=your_key kbgate-server
//!
//! # With a config file (env vars override it)
//! kbgate-server --config kbgate.yaml
//! ```
//!
//! Test with:
//! ```bash
//! curl http://localhost:8080/invocations \
//!   -H "Content-Type: application/json" \
//!   -H "x-amzn-bedrock-agentcore-runtime-custom-tenant-id: tenant-a" \
//!   -d '{"prompt": "What is the refund policy?"}'
//! ```

use clap::Parser;
use kbgate_server::{LogFormat, ServerConfig, build_app};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// kbgate - tenant-scoped knowledge base agent runtime
#[derive(Parser)]
#[command(name = "kbgate-server")]
#[command(about = "Agent runtime serving tenant-scoped knowledge base answers", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "KBGATE_CONFIG")]
    config: Option<String>,

    /// Address to bind (overrides config and KBGATE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and KBGATE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides config and KBGATE_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // CLI flags have the highest precedence
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;

    match &cli.config {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration with environment overrides"),
    }

    info!("🚀 Initializing kbgate runtime");
    let app = build_app(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("");
    info!("✅ kbgate runtime listening on http://{}", addr);
    info!("   Runtime contract:");
    info!("   - Invocations:        http://{}/invocations", addr);
    info!("   - Ping:               http://{}/ping", addr);
    info!("   - Retrieve:           http://{}/retrieve", addr);
    info!("   Observability:");
    info!("   - Health check:       http://{}/healthz", addr);
    info!("   - Readiness check:    http://{}/readyz", addr);
    info!("   - Prometheus metrics: http://{}/metrics", addr);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    // RUST_LOG directives win over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
