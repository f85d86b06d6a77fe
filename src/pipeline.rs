// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Submission protection pipeline.
//!
//! Checks run in a fixed order and the first failure ends the request:
//!
//! ```text
//! user agent → rate limit → body size → JSON decode → token present
//!     → token verified → sanitize → deliver
//! ```
//!
//! Every rejection answers with the same generic body. The specific cause
//! only reaches the operator log.

use crate::config::{Config, OptionsConfig};
use crate::limiter::SubmissionLimiter;
use crate::mailer::{MailError, Mailer};
use crate::sanitizer::sanitize_payload;
use crate::verifier::{ChallengeVerifier, VerifyError};
use futures_util::StreamExt;
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Body returned for every rejected submission.
pub const GENERIC_REJECTION: &str = "invalid request";

/// Best-effort client attribution used as the rate limit key.
///
/// Taken from the first `X-Forwarded-For` entry when present, otherwise
/// the peer address. The header is not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match (forwarded, peer) {
            (Some(ip), _) => Self(ip.to_string()),
            (None, Some(addr)) => Self(addr.ip().to_string()),
            (None, None) => Self("unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded request body. Both fields may be absent or null.
#[derive(Debug, Default, Deserialize)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("fake user agent")]
    UserAgent,

    #[error("rate limit")]
    RateLimited,

    #[error("content-length too large: {declared} > {limit}")]
    ContentLengthTooLarge { declared: u64, limit: usize },

    #[error("body too large: more than {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read body: {0}")]
    BodyUnreadable(#[source] axum::Error),

    #[error("bad json: {0}")]
    BadPayload(#[source] serde_json::Error),

    #[error("missing token")]
    MissingToken,

    #[error("turnstile failed: {0}")]
    Unverified(#[from] VerifyError),

    #[error("turnstile failed: challenge not passed {codes:?}")]
    ChallengeFailed { codes: Vec<String> },

    #[error("send mail failed: {0}")]
    DeliveryFailed(#[from] MailError),
}

impl Rejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Metrics label for this rejection.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UserAgent => "user_agent",
            Self::RateLimited => "rate_limited",
            Self::ContentLengthTooLarge { .. } | Self::BodyTooLarge { .. } => "body_too_large",
            Self::BodyUnreadable(_) => "body_unreadable",
            Self::BadPayload(_) => "bad_payload",
            Self::MissingToken => "missing_token",
            Self::Unverified(_) | Self::ChallengeFailed { .. } => "unverified",
            Self::DeliveryFailed(_) => "delivery_failed",
        }
    }

    /// Failures caused by our side rather than the client.
    pub fn is_server_side(&self) -> bool {
        matches!(self, Self::DeliveryFailed(_))
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status_code(), GENERIC_REJECTION).into_response()
    }
}

/// Ordered checks in front of mail delivery.
pub struct SubmissionPipeline {
    options: OptionsConfig,
    subject: String,
    limiter: SubmissionLimiter,
    verifier: Arc<dyn ChallengeVerifier>,
    mailer: Arc<dyn Mailer>,
}

impl SubmissionPipeline {
    pub fn new(
        config: &Config,
        verifier: Arc<dyn ChallengeVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self::with_limiter(
            config,
            SubmissionLimiter::new(&config.rate_limit),
            verifier,
            mailer,
        )
    }

    pub fn with_limiter(
        config: &Config,
        limiter: SubmissionLimiter,
        verifier: Arc<dyn ChallengeVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            options: config.options.clone(),
            subject: config.smtp.subject.clone(),
            limiter,
            verifier,
            mailer,
        }
    }

    pub fn limiter(&self) -> &SubmissionLimiter {
        &self.limiter
    }

    /// Run one submission through every stage.
    pub async fn process(
        &self,
        identity: &ClientIdentity,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<(), Rejection> {
        self.check_user_agent(headers)?;
        self.check_rate(identity).await?;
        self.check_content_length(headers)?;
        let bytes = read_capped(body, self.options.max_body_size).await?;
        let request = decode_submission(&bytes)?;
        let token = require_token(&request)?;
        self.check_token(token, identity).await?;

        let payload = sanitize_payload(&request.payload.unwrap_or_default());
        self.mailer.deliver(&self.subject, &payload).await?;
        Ok(())
    }

    fn check_user_agent(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        if !self.options.block_bot_user_agents {
            return Ok(());
        }
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if is_blocked_user_agent(user_agent, &self.options.blocked_user_agents) {
            return Err(Rejection::UserAgent);
        }
        Ok(())
    }

    async fn check_rate(&self, identity: &ClientIdentity) -> Result<(), Rejection> {
        if self.limiter.admit(identity.as_str()).await {
            Ok(())
        } else {
            Err(Rejection::RateLimited)
        }
    }

    fn check_content_length(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        match declared {
            Some(declared) if declared > self.options.max_body_size as u64 => {
                Err(Rejection::ContentLengthTooLarge {
                    declared,
                    limit: self.options.max_body_size,
                })
            }
            _ => Ok(()),
        }
    }

    async fn check_token(&self, token: &str, identity: &ClientIdentity) -> Result<(), Rejection> {
        let outcome = self.verifier.verify(token, identity.as_str()).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(Rejection::ChallengeFailed {
                codes: outcome.error_codes,
            })
        }
    }
}

/// Case-insensitive substring match; an empty user agent counts as blocked.
pub fn is_blocked_user_agent(user_agent: &str, denylist: &[String]) -> bool {
    if user_agent.is_empty() {
        return true;
    }
    let lower = user_agent.to_lowercase();
    denylist
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Read at most `limit` bytes of `body`.
///
/// Exceeding the limit and a failing stream are reported separately.
pub async fn read_capped(body: Body, limit: usize) -> Result<Vec<u8>, Rejection> {
    let mut stream = body.into_data_stream();
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Rejection::BodyUnreadable)?;
        if bytes.len() + chunk.len() > limit {
            return Err(Rejection::BodyTooLarge { limit });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Decode the first JSON value of the body.
///
/// An empty body is a clean end of input and yields an empty request.
/// Invalid UTF-8 and unpaired surrogate escapes become U+FFFD instead of
/// failing the request.
pub fn decode_submission(bytes: &[u8]) -> Result<SubmissionRequest, Rejection> {
    let text = String::from_utf8_lossy(bytes);
    let text = replace_lone_surrogates(&text);
    let mut values = serde_json::Deserializer::from_str(&text).into_iter::<SubmissionRequest>();
    match values.next() {
        None => Ok(SubmissionRequest::default()),
        Some(Ok(request)) => Ok(request),
        Some(Err(e)) => Err(Rejection::BadPayload(e)),
    }
}

/// Rewrite `\uXXXX` escapes of unpaired UTF-16 surrogates as `\uFFFD`.
fn replace_lone_surrogates(json: &str) -> Cow<'_, str> {
    if !json.contains("\\u") {
        return Cow::Borrowed(json);
    }

    let bytes = json.as_bytes();
    let mut out = String::with_capacity(json.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        match unicode_escape(bytes, i) {
            Some(0xD800..=0xDBFF)
                if matches!(unicode_escape(bytes, i + 6), Some(0xDC00..=0xDFFF)) =>
            {
                i += 12;
            }
            Some(0xD800..=0xDFFF) => {
                out.push_str(&json[copied..i]);
                out.push_str("\\uFFFD");
                i += 6;
                copied = i;
            }
            Some(_) => i += 6,
            // Any other escape covers exactly one more character.
            None => i += 2,
        }
    }

    if copied == 0 {
        return Cow::Borrowed(json);
    }
    out.push_str(&json[copied..]);
    Cow::Owned(out)
}

/// Code unit of a `\uXXXX` escape starting at `at`.
fn unicode_escape(bytes: &[u8], at: usize) -> Option<u32> {
    let escape = bytes.get(at..at + 6)?;
    if &escape[..2] != b"\\u" || !escape[2..].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let hex = std::str::from_utf8(&escape[2..]).ok()?;
    u32::from_str_radix(hex, 16).ok()
}

fn require_token(request: &SubmissionRequest) -> Result<&str, Rejection> {
    match request.token.as_deref() {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(Rejection::MissingToken),
    }
}
