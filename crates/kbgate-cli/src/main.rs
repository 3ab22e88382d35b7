//! kbgate CLI
//!
//! Invokes a running kbgate runtime the way the managed runtime would.
//!
//! Exit codes: `0` on a 2xx response, `1` when the runtime answers with an
//! error status, `2` on transport failure or an invalid payload.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use kbgate_core::{RUNTIME_SESSION_HEADER, tenant::DEFAULT_TENANT_HEADER};
use serde_json::Value;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:8080";

#[derive(Parser)]
#[command(name = "kbgate")]
#[command(about = "kbgate - invoke a tenant-scoped knowledge base agent runtime", long_about = None)]
struct Cli {
    /// Log request details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a JSON payload to /invocations and print the response
    Invoke {
        /// Payload, e.g. '{"prompt": "What is the refund policy?"}'
        payload: String,

        /// Runtime base URL
        #[arg(long, env = "KBGATE_URL", default_value = DEFAULT_URL)]
        url: String,

        /// Runtime session ID header to send
        #[arg(long)]
        session_id: Option<String>,

        /// Tenant header to send (what the auth layer would inject)
        #[arg(long, env = "KBGATE_TENANT")]
        tenant: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },
    /// Check the runtime's /ping endpoint
    Ping {
        /// Runtime base URL
        #[arg(long, env = "KBGATE_URL", default_value = DEFAULT_URL)]
        url: String,
    },
}

/// Result of a call against the runtime
#[derive(Debug)]
enum Outcome {
    /// 2xx response
    Success(Value),
    /// Error status from the runtime
    HttpError { status: u16, body: Value },
}

impl Outcome {
    fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success(_) => 0,
            Outcome::HttpError { .. } => 1,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Invoke {
            payload,
            url,
            session_id,
            tenant,
            timeout_secs,
        } => {
            invoke(
                &url,
                &payload,
                session_id.as_deref(),
                tenant.as_deref(),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Commands::Ping { url } => ping(&url).await,
    };

    match result {
        Ok(outcome) => {
            match &outcome {
                Outcome::Success(body) => println!("{}", pretty(body)),
                Outcome::HttpError { status, body } => {
                    eprintln!("Error: runtime returned HTTP {}", status);
                    println!("{}", pretty(body));
                }
            }
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Parse the payload argument into a JSON object
fn parse_payload(payload: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(payload).context("Invalid payload JSON")?;
    if !value.is_object() {
        bail!("Payload must be a JSON object");
    }
    Ok(value)
}

async fn invoke(
    url: &str,
    payload: &str,
    session_id: Option<&str>,
    tenant: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Outcome> {
    let payload = parse_payload(payload)?;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let endpoint = format!("{}/invocations", url.trim_end_matches('/'));
    debug!("POST {}", endpoint);

    let mut request = client.post(&endpoint).json(&payload);
    if let Some(session_id) = session_id {
        request = request.header(RUNTIME_SESSION_HEADER, session_id);
    }
    if let Some(tenant) = tenant {
        request = request.header(DEFAULT_TENANT_HEADER, tenant);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?;
    read_outcome(response).await
}

async fn ping(url: &str) -> anyhow::Result<Outcome> {
    let endpoint = format!("{}/ping", url.trim_end_matches('/'));
    debug!("GET {}", endpoint);

    let response = reqwest::Client::new()
        .get(&endpoint)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?;
    read_outcome(response).await
}

async fn read_outcome(response: reqwest::Response) -> anyhow::Result<Outcome> {
    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;
    // Non-JSON bodies are shown as a plain string
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if status.is_success() {
        Ok(Outcome::Success(body))
    } else {
        Ok(Outcome::HttpError {
            status: status.as_u16(),
            body,
        })
    }
}

fn pretty(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
