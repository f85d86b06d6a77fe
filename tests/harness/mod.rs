// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared fixtures for driving the full router without network
//! collaborators.

#![allow(dead_code)]

pub mod requests;
pub mod stubs;

use axum::Router;
use site_backend::{
    config::Config,
    handlers::{self, AppState},
};
use std::sync::Arc;
use stubs::{RecordingMailer, StubVerifier};

/// Router plus handles on its collaborators.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub verifier: Arc<StubVerifier>,
    pub mailer: Arc<RecordingMailer>,
}

/// Defaults with mail addresses filled in.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.smtp.from_address = "web@example.com".to_string();
    config.smtp.to_address = "inbox@example.com".to_string();
    config
}

pub fn build_app(
    config: Config,
    verifier: Arc<StubVerifier>,
    mailer: Arc<RecordingMailer>,
) -> TestApp {
    let state = Arc::new(
        AppState::new(config, verifier.clone(), mailer.clone()).expect("metrics registry"),
    );
    TestApp {
        router: handlers::router(state.clone()),
        state,
        verifier,
        mailer,
    }
}

/// App with a passing verifier and a working mailer.
pub fn default_app() -> TestApp {
    build_app(test_config(), StubVerifier::passing(), RecordingMailer::new())
}
