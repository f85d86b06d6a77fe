// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-process stand-ins for the verification service and mail transport.

use futures_util::future::{BoxFuture, FutureExt};
use site_backend::{
    mailer::{MailError, Mailer},
    sanitizer::SanitizedPayload,
    verifier::{ChallengeVerifier, VerificationOutcome, VerifyError},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Canned verifier answer.
#[derive(Debug, Clone, Copy)]
pub enum Verdict {
    Pass,
    Fail,
    ServiceError,
}

/// Verifier that counts calls and returns a fixed verdict.
pub struct StubVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, String)>>,
}

impl StubVerifier {
    pub fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn passing() -> Arc<Self> {
        Self::new(Verdict::Pass)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(token, remote_ip)` pairs in call order.
    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }
}

impl ChallengeVerifier for StubVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<VerificationOutcome, VerifyError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((token.to_string(), remote_ip.to_string()));

        let result = match self.verdict {
            Verdict::Pass => Ok(VerificationOutcome::passed()),
            Verdict::Fail => Ok(VerificationOutcome::failed(&["invalid-input-response"])),
            Verdict::ServiceError => Err(VerifyError::Service {
                status: 500,
                body: "upstream exploded".to_string(),
            }),
        };
        async move { result }.boxed()
    }
}

/// Mailer that records deliveries instead of sending them.
pub struct RecordingMailer {
    fail: bool,
    sent: Mutex<Vec<(String, SanitizedPayload)>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Mailer whose every delivery fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(String, SanitizedPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn deliver<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a SanitizedPayload,
    ) -> BoxFuture<'a, Result<(), MailError>> {
        let result = if self.fail {
            let err = "not-an-address"
                .parse::<lettre::Address>()
                .expect_err("address without domain");
            Err(MailError::from(err))
        } else {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), payload.clone()));
            Ok(())
        };
        async move { result }.boxed()
    }
}
