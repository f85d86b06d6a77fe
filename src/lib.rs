// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Site Backend
//!
//! Serves static and single-page sites and relays a single form endpoint
//! to email once the submission clears bot and spam mitigation:
//!
//! - User-agent denylist
//! - Per-client sliding window rate limiting (5 per minute default)
//! - Request body size cap
//! - Turnstile CAPTCHA verification
//! - Markup, URL and control-byte stripping before mail delivery

pub mod config;
pub mod handlers;
pub mod limiter;
pub mod mailer;
pub mod metrics;
pub mod pipeline;
pub mod sanitizer;
pub mod sites;
pub mod telemetry;
pub mod verifier;

pub use config::Config;
pub use limiter::SubmissionLimiter;
pub use mailer::{MailError, Mailer, SmtpMailer};
pub use pipeline::{ClientIdentity, Rejection, SubmissionPipeline};
pub use verifier::{ChallengeVerifier, TurnstileVerifier, VerificationOutcome, VerifyError};
