// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the site backend.
//!
//! Loaded once at startup from a JSON file. Every field has a default so a
//! minimal file only needs the SMTP addresses and the Turnstile secret.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable that overrides `turnstile.secret`.
pub const TURNSTILE_SECRET_ENV: &str = "SITE_BACKEND_TURNSTILE_SECRET";

/// Older name of [`TURNSTILE_SECRET_ENV`], read when the new one is unset.
pub const LEGACY_TURNSTILE_SECRET_ENV: &str = "WB_CF_TURN_SECRET";

/// Routes mounted by the service itself.
const HEALTH_ROUTES: [&str; 2] = ["/health", "/healthz"];

/// Required length of a Turnstile secret key.
const TURNSTILE_SECRET_LEN: usize = 35;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Static locations keyed by URL prefix
    #[serde(default)]
    pub locations: BTreeMap<String, SiteConfig>,

    /// Challenge verification service
    #[serde(default, alias = "cfTurnstile")]
    pub turnstile: TurnstileConfig,

    /// Outbound mail
    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Submission endpoint options
    #[serde(default)]
    pub options: OptionsConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How a location is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Static,
    Spa,
}

/// A directory mounted under a URL prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub dir: PathBuf,

    #[serde(rename = "type")]
    pub kind: SiteKind,

    /// Page answered for client-side routes (spa only)
    #[serde(default = "default_basepage")]
    pub basepage: String,

    /// Client-side routes that resolve to the base page (spa only)
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Turnstile verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnstileConfig {
    #[serde(default = "default_turnstile_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub secret: String,

    /// Request timeout in seconds (default: 10)
    #[serde(default = "default_turnstile_timeout")]
    pub timeout_secs: u64,

    /// Set when the secret was taken from the environment
    #[serde(skip)]
    pub secret_from_env: bool,
}

/// Transport security used for the SMTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpEncryption {
    /// Implicit TLS from the first byte
    Ssl,
    /// STARTTLS when the server advertises it, plaintext otherwise
    Starttls,
    #[default]
    #[serde(alias = "plain")]
    None,
}

/// SMTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub encryption: SmtpEncryption,

    /// Authentication is only attempted when non-empty
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Verify the server certificate (default: true)
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    #[serde(default)]
    pub from_address: String,

    #[serde(default)]
    pub to_address: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// Transport timeout in seconds (default: 30)
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// File to append to; stderr when empty
    #[serde(default)]
    pub destination: String,

    #[serde(default = "default_min_level")]
    pub min_level: String,

    /// JSON lines instead of human-readable text (default: true)
    #[serde(default = "default_true")]
    pub json: bool,
}

/// Submission endpoint options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsConfig {
    #[serde(default = "default_submit_path", alias = "ctaEndpoint")]
    pub submit_path: String,

    /// Maximum accepted request body in bytes (default: 4096)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    #[serde(default = "default_true")]
    pub block_bot_user_agents: bool,

    /// Case-insensitive substrings that mark a user agent as automated
    #[serde(default = "default_blocked_user_agents")]
    pub blocked_user_agents: Vec<String>,

    /// Older switch for `rateLimit.enabled`; wins when present
    #[serde(default, skip_serializing)]
    pub enable_rate_limiting: Option<bool>,
}

/// Per-client sliding window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Admissions allowed per window (default: 5)
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_basepage() -> String {
    "index.html".to_string()
}

fn default_turnstile_endpoint() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}

fn default_turnstile_timeout() -> u64 {
    10
}

fn default_smtp_server() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_subject() -> String {
    "New CTA Submission".to_string()
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_min_level() -> String {
    "info".to_string()
}

fn default_submit_path() -> String {
    "/-/cta".to_string()
}

fn default_max_body_size() -> usize {
    4096
}

fn default_blocked_user_agents() -> Vec<String> {
    vec![
        "curl/".to_string(),
        "python-requests".to_string(),
        "bot".to_string(),
    ]
}

fn default_max_requests() -> usize {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            endpoint: default_turnstile_endpoint(),
            secret: String::new(),
            timeout_secs: default_turnstile_timeout(),
            secret_from_env: false,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            encryption: SmtpEncryption::default(),
            username: String::new(),
            password: String::new(),
            verify_tls: default_true(),
            from_address: String::new(),
            to_address: String::new(),
            subject: default_subject(),
            timeout_secs: default_smtp_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            min_level: default_min_level(),
            json: default_true(),
        }
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            submit_path: default_submit_path(),
            max_body_size: default_max_body_size(),
            block_bot_user_agents: default_true(),
            blocked_user_agents: default_blocked_user_agents(),
            enable_rate_limiting: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load, normalize and validate the configuration file at `path`.
    ///
    /// The Turnstile secret may be overridden by [`TURNSTILE_SECRET_ENV`]
    /// or, failing that, [`LEGACY_TURNSTILE_SECRET_ENV`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw, secret_from_env(|name| std::env::var(name).ok()))
    }

    /// Parse a configuration document, applying an optional secret override.
    pub fn from_json(raw: &str, secret_override: Option<String>) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(raw)?;

        if config.options.max_body_size == 0 {
            config.options.max_body_size = default_max_body_size();
        }
        if config.options.submit_path.is_empty() {
            config.options.submit_path = default_submit_path();
        }
        if config.turnstile.endpoint.is_empty() {
            config.turnstile.endpoint = default_turnstile_endpoint();
        }
        if let Some(enabled) = config.options.enable_rate_limiting {
            config.rate_limit.enabled = enabled;
        }
        if let Some(secret) = secret_override {
            config.turnstile.secret = secret;
            config.turnstile.secret_from_env = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = &self.turnstile.secret;
        if !secret.is_empty() && secret.len() != TURNSTILE_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "turnstile.secret must be {TURNSTILE_SECRET_LEN} characters long"
            )));
        }

        match Url::parse(&self.turnstile.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "turnstile.endpoint must be a valid URL starting with http:// or https://"
                        .to_string(),
                ))
            }
        }

        if !self.options.submit_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "options.submitPath must start with '/'".to_string(),
            ));
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "metrics.path must start with '/'".to_string(),
            ));
        }

        self.check_route_overlap()
    }

    /// Reject endpoint paths that another route already answers.
    fn check_route_overlap(&self) -> Result<(), ConfigError> {
        let submit = self.options.submit_path.trim_end_matches('/');
        let metrics = self.metrics.path.trim_end_matches('/');

        let mut taken: Vec<(&str, &str)> = HEALTH_ROUTES
            .iter()
            .map(|route| (*route, "the health check"))
            .collect();
        if self.metrics.enabled {
            if HEALTH_ROUTES.contains(&metrics) {
                return Err(ConfigError::Invalid(format!(
                    "metrics.path {metrics} overlaps the health check"
                )));
            }
            taken.push((metrics, "metrics.path"));
        }

        for (route, owner) in taken {
            if submit == route {
                return Err(ConfigError::Invalid(format!(
                    "options.submitPath {submit} overlaps {owner}"
                )));
            }
        }

        let mut endpoints = vec![("options.submitPath", submit)];
        if self.metrics.enabled {
            endpoints.push(("metrics.path", metrics));
        }
        for (pattern, site) in &self.locations {
            for route in site.mounted_routes(pattern) {
                for (name, path) in &endpoints {
                    if *path == route || path.starts_with(&format!("{route}/")) {
                        return Err(ConfigError::Invalid(format!(
                            "{name} {path} overlaps location {pattern}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

impl SiteConfig {
    /// Routes claimed by this location under `pattern`, each together with
    /// its whole subtree. The root location is a fallback and claims none.
    pub fn mounted_routes(&self, pattern: &str) -> Vec<String> {
        let prefix = pattern.trim_end_matches('/');
        let mut routes = Vec::new();
        if !prefix.is_empty() {
            routes.push(prefix.to_string());
        }
        if self.kind == SiteKind::Spa {
            routes.extend(self.client_routes(pattern));
        }
        routes
    }

    /// SPA sub-paths under `pattern` that answer with the base page.
    pub fn client_routes(&self, pattern: &str) -> Vec<String> {
        let prefix = pattern.trim_end_matches('/');
        self.paths
            .iter()
            .map(|path| format!("{prefix}/{}", path.trim_matches('/')))
            .map(|route| route.trim_end_matches('/').to_string())
            .filter(|route| !route.is_empty())
            .collect()
    }
}

/// Secret override from the environment, preferring the current variable.
pub fn secret_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(TURNSTILE_SECRET_ENV).or_else(|| lookup(LEGACY_TURNSTILE_SECRET_ENV))
}

impl TurnstileConfig {
    /// True when both a secret and an endpoint are present.
    pub fn is_configured(&self) -> bool {
        !self.secret.is_empty() && !self.endpoint.is_empty()
    }

    /// Secret reduced to its first five characters for logging.
    pub fn masked_secret(&self) -> String {
        let prefix: String = self.secret.chars().take(5).collect();
        format!("{prefix}*******...")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitConfig {
    /// Get the rate window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}
