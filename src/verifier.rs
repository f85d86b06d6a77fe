// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! CAPTCHA token verification against a Turnstile-compatible service.
//!
//! One POST per submission, no retries. Every anomaly is an error the
//! caller treats as a failed verification.

use crate::config::TurnstileConfig;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Why a token could not be verified.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("turnstile not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("turnstile verification failed with status: {status} Error Body: `{body}`")]
    Service { status: u16, body: String },

    #[error("malformed verification response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

/// Verdict returned by the verification service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,

    /// Service-provided reasons, for the operator log only
    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,
}

impl VerificationOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            error_codes: Vec::new(),
        }
    }

    pub fn failed(codes: &[&str]) -> Self {
        Self {
            success: false,
            error_codes: codes.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SiteverifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    remoteip: &'a str,
}

/// Capability to check a challenge token for a client.
pub trait ChallengeVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<VerificationOutcome, VerifyError>>;
}

/// Verify `token` for `remote_ip` with the given settings.
pub async fn verify_token(
    client: &reqwest::Client,
    config: &TurnstileConfig,
    token: &str,
    remote_ip: &str,
) -> Result<VerificationOutcome, VerifyError> {
    if !config.is_configured() {
        return Err(VerifyError::NotConfigured);
    }

    let response = client
        .post(&config.endpoint)
        .json(&SiteverifyRequest {
            secret: &config.secret,
            response: token,
            remoteip: remote_ip,
        })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        // Usually a configuration problem on our side.
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "(cannot read body)".to_string());
        return Err(VerifyError::Service {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    let outcome: VerificationOutcome =
        serde_json::from_str(&body).map_err(VerifyError::MalformedResponse)?;
    debug!(success = outcome.success, error_codes = ?outcome.error_codes, "Token verified");
    Ok(outcome)
}

/// HTTP client for the Turnstile siteverify endpoint.
pub struct TurnstileVerifier {
    config: TurnstileConfig,
    client: reqwest::Client,
}

impl TurnstileVerifier {
    pub fn new(config: TurnstileConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }
}

impl ChallengeVerifier for TurnstileVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<VerificationOutcome, VerifyError>> {
        verify_token(&self.client, &self.config, token, remote_ip).boxed()
    }
}
