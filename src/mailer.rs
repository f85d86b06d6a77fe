// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Submission delivery over SMTP.
//!
//! The sanitized payload is rendered as a small HTML table, one row per
//! field in key order, and sent in a single SMTP session. Transport
//! security follows [`SmtpEncryption`]:
//!
//! - `ssl`: implicit TLS from connect.
//! - `starttls`: upgrades only when the server advertises STARTTLS and
//!   otherwise continues in plaintext.
//! - `none`: plaintext.

use crate::config::{SmtpConfig, SmtpEncryption};
use crate::sanitizer::SanitizedPayload;
use futures_util::future::{BoxFuture, FutureExt};
use lettre::address::AddressError;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::debug;

/// Delivery failure. There is no partial success.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Capability to deliver a sanitized submission.
pub trait Mailer: Send + Sync {
    fn deliver<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a SanitizedPayload,
    ) -> BoxFuture<'a, Result<(), MailError>>;
}

/// Render the payload as a minimal HTML document.
pub fn render_html(payload: &SanitizedPayload) -> String {
    let mut html = String::from(
        "<html>\n\
         <h1>New Submission</h1>\n\
         <table width=\"600\" style=\"border:1px solid #333\">\n\
         <thead>\n\
         <tr><th align=\"left\">Field</th><th align=\"left\">Value</th></tr>\n\
         </thead>\n\
         <tbody>\n",
    );
    for (name, value) in payload.iter() {
        let _ = writeln!(
            html,
            "<tr><td><code>{name}</code></td><td><pre>{value}</pre></td></tr>"
        );
    }
    html.push_str("</tbody>\n</table>\n</html>\n");
    html
}

/// Build the message envelope and body.
pub fn build_message(
    config: &SmtpConfig,
    subject: &str,
    payload: &SanitizedPayload,
) -> Result<Message, MailError> {
    let from: Mailbox = config.from_address.parse()?;
    let to: Mailbox = config.to_address.parse()?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(render_html(payload))?;
    Ok(message)
}

/// Build the transport for the configured encryption mode.
pub fn build_transport(
    config: &SmtpConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
    let tls_parameters = || {
        TlsParameters::builder(config.server.clone())
            .dangerous_accept_invalid_certs(!config.verify_tls)
            .dangerous_accept_invalid_hostnames(!config.verify_tls)
            .build()
    };

    let tls = match config.encryption {
        SmtpEncryption::Ssl => Tls::Wrapper(tls_parameters()?),
        SmtpEncryption::Starttls => Tls::Opportunistic(tls_parameters()?),
        SmtpEncryption::None => Tls::None,
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        .port(config.port)
        .tls(tls)
        .timeout(Some(config.timeout()));

    if !config.username.is_empty() {
        builder = builder
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain, Mechanism::Login]);
    }

    Ok(builder.build())
}

/// Mailer that opens one SMTP session per delivery.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    async fn send(&self, subject: &str, payload: &SanitizedPayload) -> Result<(), MailError> {
        let message = build_message(&self.config, subject, payload)?;
        let transport = build_transport(&self.config)?;
        let response = transport.send(message).await?;
        debug!(
            server = %self.config.server,
            code = %response.code(),
            "Submission mail queued"
        );
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn deliver<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a SanitizedPayload,
    ) -> BoxFuture<'a, Result<(), MailError>> {
        self.send(subject, payload).boxed()
    }
}
