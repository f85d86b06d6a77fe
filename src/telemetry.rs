// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Process-wide log subscriber.

use crate::config::LogConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{warn, Level};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    prelude::*,
    EnvFilter,
};

/// Parse a configured level name, falling back to `info`.
pub fn parse_level(name: &str) -> Level {
    name.trim().parse().unwrap_or(Level::INFO)
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `min_level`. When `destination` cannot
/// be opened the error is logged and output goes to stderr.
pub fn init(config: &LogConfig) {
    let (writer, open_error) = if config.destination.is_empty() {
        (BoxMakeWriter::new(std::io::stderr), None)
    } else {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.destination)
        {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
            Err(e) => (BoxMakeWriter::new(std::io::stderr), Some(e)),
        }
    };

    let layer = if config.json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_writer(writer).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(parse_level(&config.min_level).into())
                .from_env_lossy(),
        )
        .init();

    if let Some(e) = open_error {
        warn!(destination = %config.destination, error = %e, "Failed to open log file, using stderr");
    }
}
