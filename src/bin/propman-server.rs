// ABOUTME: Server binary - wires the database, audit service, safety monitor, and HTTP router
// ABOUTME: Runs until SIGINT/SIGTERM, then shuts the listener down gracefully
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Propman Impersonation Server Binary
//!
//! Starts the administrative impersonation service: audit-logged sessions,
//! grant-scoped user search, and automatic safety termination.

use anyhow::{Context, Result};
use clap::Parser;
use propman_server::{
    audit::AuditService,
    config::ServerConfig,
    database::Database,
    impersonation::{spawn_watchdog, MonitorEvent, SafetyMonitor, SessionStateRegistry},
    logging,
    routes::ServerResources,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "propman-server")]
#[command(about = "Propman impersonation service - audited super admin impersonation")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("Failed to load configuration")?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init(config.log_level)?;
    info!("Starting Propman impersonation server");

    let database = Arc::new(
        Database::new(&config.database_url)
            .await
            .context("Failed to initialize database")?,
    );
    info!(database_url = %config.database_url, "Database initialized");

    let audit = Arc::new(AuditService::new(
        Arc::clone(&database),
        config.default_limits,
    ));
    let registry = Arc::new(SessionStateRegistry::new());
    let (monitor, events) = SafetyMonitor::new(Arc::clone(&audit), Arc::clone(&registry));

    drain_monitor_events(events);
    let watchdog = spawn_watchdog(Arc::clone(&registry), Arc::new(monitor.clone()));

    let resources = Arc::new(ServerResources::new(
        database,
        audit,
        registry,
        monitor,
        config,
    ));
    let router = resources.router();

    let addr = format!("0.0.0.0:{}", resources.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    watchdog.abort();
    info!("Server shut down");
    Ok(())
}

/// Log monitor events; in this deployment there is no push channel to the
/// operator's browser, so the client polls the status endpoint instead
fn drain_monitor_events(mut events: mpsc::Receiver<MonitorEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MonitorEvent::ExpiryWarning {
                    session_id,
                    remaining_minutes,
                } => info!(
                    session_id = %session_id,
                    remaining_minutes,
                    "Session approaching its duration ceiling"
                ),
                MonitorEvent::ForcedEnd { session_id, reason } => warn!(
                    session_id = %session_id,
                    reason = ?reason,
                    "Session was force-ended"
                ),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("Failed to listen for SIGTERM: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
