// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request builders and response helpers.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const SUBMIT_PATH: &str = "/-/cta";

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Body with a token and the canonical contact payload.
pub fn contact_body(token: &str) -> Value {
    json!({
        "token": token,
        "payload": {"name": "Alice", "email": "a@example.com"}
    })
}

/// POST to the submit path from `ip` with a browser user agent.
pub fn submission(ip: &str, body: &Value) -> Request<Body> {
    raw_submission(ip, Some(BROWSER_UA), body.to_string())
}

/// POST with full control over user agent and body bytes.
pub fn raw_submission(ip: &str, user_agent: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::post(SUBMIT_PATH)
        .header("x-forwarded-for", ip)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ua) = user_agent {
        builder = builder.header(header::USER_AGENT, ua);
    }
    builder.body(body.into()).unwrap()
}

/// Send a request through a clone of the router.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}
