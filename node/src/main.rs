// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AMPARO Node
//!
//! Entry point for the `amparo-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the custody engine to the event
//! monitor and fraud analyzer, and serves the command API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — initialize the data directory and authority bootstrap
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use amparo_custody::authority::{AuthorityRegistry, Capability};
use amparo_custody::redemption::RedemptionEngine;
use amparo_ledger::config::{EVENT_CHANNEL_CAPACITY, EXPIRY_SWEEP_INTERVAL};
use amparo_ledger::content::{ContentStore, InMemoryContentStore};
use amparo_ledger::event::EventBus;
use amparo_ledger::fraud::{AuthorityDirectory, FraudAnalyzer, FraudConfig};
use amparo_ledger::monitor::EventMonitor;
use amparo_ledger::projection::{InMemoryProjectionStore, ProjectionStore};
use amparo_ledger::submit::{RecordingLedgerClient, SubmitOptions};

use cli::{AmparoNodeCli, Commands};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast capacity for the live fraud-alert feed. Sized like the event
/// bus: enough to absorb a burst without dropping frames for attached
/// operator consoles.
const ALERT_FEED_CAPACITY: usize = 256;

/// File inside the data directory holding the capability bootstrap.
const AUTHORITY_FILE: &str = "authorities.json";

/// One capability grant in the bootstrap file.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct AuthorityGrant {
    actor: String,
    capabilities: Vec<Capability>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AmparoNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: custody engine, event monitor, fraud analyzer,
/// expiry sweep, command API, and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init(
        "amparo_node=info,amparo_custody=info,amparo_ledger=info,tower_http=debug",
        LogFormat::parse_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting amparo-node"
    );

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    // --- Capability grants ---
    let authority = Arc::new(AuthorityRegistry::new());
    load_authorities(&args.data_dir, &authority, &args.admin_actor)?;

    // --- Boundaries ---
    // The in-process ledger client and content store stand in for the
    // external chain and evidence store; both sit behind traits and swap
    // out per deployment.
    let client = Arc::new(RecordingLedgerClient::new());
    let content = Arc::new(InMemoryContentStore::new());
    let bus = EventBus::new(EVENT_CHANNEL_CAPACITY);

    // --- Custody engine ---
    let engine = Arc::new(RedemptionEngine::new(
        Arc::clone(&authority),
        client,
        Arc::clone(&content) as Arc<dyn ContentStore>,
        bus.clone(),
        SubmitOptions::default(),
    ));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Monitor + fraud analyzer ---
    let projections = Arc::new(InMemoryProjectionStore::new());
    let analyzer = Arc::new(FraudAnalyzer::new(
        FraudConfig::default(),
        Arc::clone(&authority) as Arc<dyn AuthorityDirectory>,
        Arc::clone(&content) as Arc<dyn ContentStore>,
    ));
    let (monitor, mut alert_rx) =
        EventMonitor::new(Arc::clone(&projections) as Arc<dyn ProjectionStore>, analyzer);
    let monitor_task = tokio::spawn(monitor.run(bus.subscribe()));

    // --- Alert fan-out ---
    let (alert_feed, _) = broadcast::channel(ALERT_FEED_CAPACITY);
    let alerts = Arc::new(parking_lot::RwLock::new(Vec::new()));
    let alert_task = {
        let alerts = Arc::clone(&alerts);
        let alert_feed = alert_feed.clone();
        let metrics = Arc::clone(&node_metrics);
        tokio::spawn(async move {
            while let Some(alert) = alert_rx.recv().await {
                metrics.fraud_alerts_total.inc();
                alerts.write().push(alert.clone());
                // No subscribers is fine; the alert is already collected.
                let _ = alert_feed.send(alert);
            }
        })
    };

    // --- Expiry sweep ---
    // Stands in for the external scheduler: reports expired vouchers on a
    // fixed cadence. Expiry itself is time-derived; nothing is mutated.
    let sweep_task = {
        let engine = Arc::clone(&engine);
        let metrics = Arc::clone(&node_metrics);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let now = chrono::Utc::now();
                let expired = engine.expired_vouchers(now);
                metrics.expired_vouchers.set(expired.len() as i64);
                metrics
                    .outstanding_vouchers
                    .set(engine.outstanding_vouchers(now) as i64);
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "expired vouchers pending reissue");
                }
            }
        })
    };

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: chrono::Utc::now(),
        engine,
        metrics: Arc::clone(&node_metrics),
        bus,
        alert_feed,
        alerts,
        projections: projections as Arc<dyn ProjectionStore>,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    sweep_task.abort();
    alert_task.abort();
    monitor_task.abort();
    tracing::info!("amparo-node stopped");
    Ok(())
}

/// Loads the authority bootstrap from the data directory, or grants the
/// full capability set to the configured admin identity when no file is
/// present.
fn load_authorities(
    data_dir: &Path,
    authority: &AuthorityRegistry,
    admin_actor: &str,
) -> Result<()> {
    let path = data_dir.join(AUTHORITY_FILE);
    if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let grants: Vec<AuthorityGrant> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed authority bootstrap: {}", path.display()))?;
        for grant in &grants {
            for capability in &grant.capabilities {
                authority.grant(&grant.actor, *capability);
            }
        }
        tracing::info!(path = %path.display(), actors = grants.len(), "authority bootstrap loaded");
    } else {
        authority.grant_all(admin_actor);
        tracing::info!(admin_actor, "no authority bootstrap found, granting full set to admin");
    }
    Ok(())
}

/// Initializes a data directory with a default authority bootstrap.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init("amparo_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let grants = vec![AuthorityGrant {
        actor: args.admin_actor.clone(),
        capabilities: vec![
            Capability::CreateZone,
            Capability::VerifyVendor,
            Capability::ReviewProof,
        ],
    }];
    let path = data_dir.join(AUTHORITY_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&grants)?)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), "authority bootstrap written");

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Admin actor    : {}", args.admin_actor);
    println!("  Authorities    : {}", path.display());

    Ok(())
}

/// Queries a running node's status endpoint and prints the JSON body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP/1.1 GET over a raw TCP stream. One internal status query
/// does not justify an HTTP client dependency; swap this for a proper
/// client if the CLI ever grows more remote calls.
async fn http_get(url: &str) -> Result<String> {
    let (host, port, path) = parse_http_url(url)?;

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());
    Ok(body)
}

/// Splits an `http://host[:port]/path` URL into its parts. Just enough
/// parsing for the status subcommand.
fn parse_http_url(url: &str) -> Result<(String, u16, String)> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow::anyhow!("only http:// URLs are supported: {}", url))?;

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .with_context(|| format!("bad port in URL: {}", url))?,
        ),
        None => (authority.to_string(), 80),
    };

    Ok((host, port, path))
}

/// Prints version information to stdout.
fn print_version() {
    println!("amparo-node {}", env!("CARGO_PKG_VERSION"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_with_port_and_path() {
        let (host, port, path) = parse_http_url("http://127.0.0.1:8741/status").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8741);
        assert_eq!(path, "/status");
    }

    #[test]
    fn parse_url_defaults() {
        let (host, port, path) = parse_http_url("http://relief.example.org").unwrap();
        assert_eq!(host, "relief.example.org");
        assert_eq!(port, 80);
        assert_eq!(path, "/");
    }

    #[test]
    fn https_rejected() {
        assert!(parse_http_url("https://secure.example.org/status").is_err());
    }

    #[test]
    fn authority_bootstrap_roundtrip() {
        let dir = std::env::temp_dir().join(format!("amparo-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let grants = vec![AuthorityGrant {
            actor: "gov-1".into(),
            capabilities: vec![Capability::CreateZone],
        }];
        std::fs::write(
            dir.join(AUTHORITY_FILE),
            serde_json::to_string(&grants).unwrap(),
        )
        .unwrap();

        let authority = AuthorityRegistry::new();
        load_authorities(&dir, &authority, "unused-admin").unwrap();

        assert!(authority.holds("gov-1", Capability::CreateZone));
        assert!(!authority.holds("gov-1", Capability::ReviewProof));
        // The fallback admin grant must not fire when a bootstrap exists.
        assert!(!authority.holds("unused-admin", Capability::CreateZone));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_bootstrap_grants_admin_everything() {
        let dir = std::env::temp_dir().join(format!("amparo-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let authority = AuthorityRegistry::new();
        load_authorities(&dir, &authority, "relief-admin").unwrap();
        assert!(authority.holds("relief-admin", Capability::CreateZone));
        assert!(authority.holds("relief-admin", Capability::VerifyVendor));
        assert!(authority.holds("relief-admin", Capability::ReviewProof));

        std::fs::remove_dir_all(&dir).ok();
    }
}
