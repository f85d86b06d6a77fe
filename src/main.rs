// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Site Backend Service
//!
//! Serves the configured static locations and accepts form submissions on
//! a single endpoint, forwarding them by mail after:
//!
//! - user-agent filtering
//! - per-client rate limiting
//! - body size enforcement
//! - Turnstile token verification
//! - payload sanitization
//!
//! ## Configuration
//!
//! A JSON file given by `--config` (default `config.json`). The Turnstile
//! secret can be supplied through `SITE_BACKEND_TURNSTILE_SECRET` (or the
//! older `WB_CF_TURN_SECRET`) instead.
//! The listen address comes from `--listen` or `BIND_ADDR`.

use anyhow::Context;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use site_backend::{
    config::Config,
    handlers::{self, AppState},
    mailer::SmtpMailer,
    sites, telemetry,
    verifier::TurnstileVerifier,
};

#[derive(Debug, Parser)]
#[command(name = "site-backend", version, about = "Static sites with a protected form relay")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("config load failed: {}", cli.config.display()))?;

    telemetry::init(&config.log);

    if config.turnstile.secret.is_empty() {
        warn!("Turnstile secret is not set; every submission will be rejected");
    } else {
        info!(
            endpoint = %config.turnstile.endpoint,
            secret = %config.turnstile.masked_secret(),
            from_env = config.turnstile.secret_from_env,
            "Turnstile verification configured"
        );
    }
    info!(
        submit_path = %config.options.submit_path,
        max_body_size = config.options.max_body_size,
        rate_limit_enabled = config.rate_limit.enabled,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        smtp_server = %config.smtp.server,
        smtp_encryption = ?config.smtp.encryption,
        "Starting site backend"
    );

    let verifier = TurnstileVerifier::new(config.turnstile.clone())
        .context("failed to build verification client")?;
    let mailer = SmtpMailer::new(config.smtp.clone());
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(verifier),
        Arc::new(mailer),
    )?);

    let app: Router = handlers::router(state)
        .merge(sites::router(&config.locations)?)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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
