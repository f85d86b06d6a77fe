// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the site backend.

use crate::config::Config;
use crate::mailer::Mailer;
use crate::metrics::SubmissionMetrics;
use crate::pipeline::{ClientIdentity, SubmissionPipeline};
use crate::verifier::ChallengeVerifier;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub pipeline: SubmissionPipeline,
    pub metrics: SubmissionMetrics,
}

impl AppState {
    pub fn new(
        config: Config,
        verifier: Arc<dyn ChallengeVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, prometheus::Error> {
        let pipeline = SubmissionPipeline::new(&config, verifier, mailer);
        Ok(Self {
            config,
            pipeline,
            metrics: SubmissionMetrics::new()?,
        })
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Routes served by this crate; static locations are merged separately.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route(&state.config.options.submit_path, any(submit))
        .route("/health", get(health))
        .route("/healthz", get(health));

    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(metrics));
    }

    router.with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "site-backend",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Form submission endpoint.
///
/// Answers `204` once the mail is queued, `429` when rate limited, `500`
/// when delivery fails and `400` for every other rejection.
pub async fn submit(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if request.method() != Method::POST {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = ClientIdentity::resolve(request.headers(), peer);
    let (parts, body) = request.into_parts();

    match state.pipeline.process(&identity, &parts.headers, body).await {
        Ok(()) => {
            state.metrics.record("accepted");
            info!(ip = %identity, path = %path, "Submission delivered");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(rejection) => {
            state.metrics.record(rejection.outcome());
            if rejection.is_server_side() {
                error!(ip = %identity, path = %path, reason = %rejection, "submission failed");
            } else {
                warn!(ip = %identity, path = %path, reason = %rejection, "refused submit");
            }
            rejection.into_response()
        }
    }
}
