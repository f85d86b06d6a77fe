// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Security tests for the submission endpoint.
//!
//! These tests replay abusive traffic patterns against the full router and
//! check that the protections hold and that rejections leak nothing.

mod harness;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use harness::{
    build_app, default_app,
    requests::{contact_body, raw_submission, send, submission, BROWSER_UA, SUBMIT_PATH},
    stubs::{RecordingMailer, StubVerifier, Verdict},
    test_config,
};
use serde_json::json;
use site_backend::{mailer::render_html, pipeline::GENERIC_REJECTION};
use std::collections::HashSet;

// ============================================================================
// Probing resistance
// ============================================================================

#[tokio::test]
async fn test_client_rejections_are_indistinguishable() {
    let mut responses = Vec::new();

    // Bot user agent
    let app = default_app();
    responses.push(
        send(
            &app.router,
            raw_submission("10.0.0.1", Some("python-requests/2.31"), contact_body("tok").to_string()),
        )
        .await,
    );

    // Missing token
    responses.push(send(&app.router, submission("10.0.0.2", &contact_body(""))).await);

    // Malformed JSON
    responses.push(
        send(&app.router, raw_submission("10.0.0.3", Some(BROWSER_UA), "{not json")).await,
    );

    // Oversized declaration
    let oversized = Request::post(SUBMIT_PATH)
        .header("x-forwarded-for", "10.0.0.4")
        .header(header::USER_AGENT, BROWSER_UA)
        .header(header::CONTENT_LENGTH, "9999999")
        .body(Body::from("{}"))
        .unwrap();
    responses.push(send(&app.router, oversized).await);

    // Failed challenge
    let app = build_app(test_config(), StubVerifier::new(Verdict::Fail), RecordingMailer::new());
    responses.push(send(&app.router, submission("10.0.0.5", &contact_body("tok"))).await);

    // Verification service failure
    let app = build_app(
        test_config(),
        StubVerifier::new(Verdict::ServiceError),
        RecordingMailer::new(),
    );
    responses.push(send(&app.router, submission("10.0.0.6", &contact_body("tok"))).await);

    let distinct: HashSet<_> = responses.iter().collect();
    assert_eq!(distinct.len(), 1, "rejections differ: {responses:?}");
    assert_eq!(
        responses[0],
        (StatusCode::BAD_REQUEST, GENERIC_REJECTION.to_string())
    );
}

// ============================================================================
// Flood simulation
// ============================================================================

#[tokio::test]
async fn test_single_ip_flood() {
    let app = default_app();

    let mut accepted = 0;
    let mut limited = 0;
    for _ in 0..50 {
        match send(&app.router, submission("10.1.0.1", &contact_body("tok"))).await.0 {
            StatusCode::NO_CONTENT => accepted += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(limited, 45);
    assert_eq!(app.mailer.count(), 5);
    // Limited attempts never reach the verification service.
    assert_eq!(app.verifier.calls(), 5);
}

#[tokio::test]
async fn test_distributed_clients_each_get_quota() {
    let app = default_app();

    let mut accepted = 0;
    for round in 0..6 {
        for client in 0..10 {
            let ip = format!("10.2.0.{client}");
            let (status, _) = send(&app.router, submission(&ip, &contact_body("tok"))).await;
            if status == StatusCode::NO_CONTENT {
                accepted += 1;
            } else {
                assert_eq!(round, 5, "client {ip} limited early");
            }
        }
    }

    assert_eq!(accepted, 50);
    assert_eq!(app.state.pipeline.limiter().tracked_clients().await, 10);
}

#[tokio::test]
async fn test_concurrent_burst_from_one_client() {
    let app = default_app();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move {
                send(&router, submission("10.3.0.1", &contact_body("tok"))).await.0
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() == StatusCode::NO_CONTENT {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(app.mailer.count(), 5);
}

#[tokio::test]
async fn test_forwarded_for_rotation_gets_fresh_keys() {
    // The forwarded header is trusted as-is; rotating it yields new keys.
    let app = default_app();

    for i in 0..20 {
        let ip = format!("10.4.{}.{}", i / 256, i % 256);
        let (status, _) = send(&app.router, submission(&ip, &contact_body("tok"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

// ============================================================================
// User agent bypass attempts
// ============================================================================

#[tokio::test]
async fn test_user_agent_bypass_attempts() {
    let app = default_app();
    let agents = [
        None,
        Some(""),
        Some("CURL/7.88.1"),
        Some("Python-Requests/2.31.0"),
        Some("Mozilla/5.0 (compatible; bingbot/2.0)"),
        Some("AhrefsBot/7.0"),
        Some("my-BOT-scraper"),
    ];

    for (i, agent) in agents.iter().enumerate() {
        let ip = format!("10.5.0.{i}");
        let (status, body) = send(
            &app.router,
            raw_submission(&ip, *agent, contact_body("tok").to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "agent {agent:?} was let through");
        assert_eq!(body, GENERIC_REJECTION);
    }

    assert_eq!(app.verifier.calls(), 0);
    assert_eq!(app.state.metrics.count("user_agent"), agents.len() as u64);
}

// ============================================================================
// Payload injection
// ============================================================================

#[tokio::test]
async fn test_markup_and_links_stripped_before_delivery() {
    let app = default_app();

    let body = json!({
        "token": "tok",
        "payload": {
            "message": "<script>alert(1)</script>hello https://evil.example/x world",
            "<img src=x>": "\u{0}\u{b}value\u{1f}",
            "details": {"site": "<a href=\"http://spam.example\">win</a>", "n": 3}
        }
    });
    let (status, _) = send(&app.router, submission("10.6.0.1", &body)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let sent = app.mailer.sent();
    let payload = &sent[0].1;
    assert_eq!(payload.get("message"), Some("alert(1)hello  world"));
    assert_eq!(payload.get("<img src=x>"), Some("value"));
    assert_eq!(
        payload.get("details"),
        Some("{\n  \"n\": 3,\n  \"site\": \"win\"\n}")
    );

    let html = render_html(payload);
    assert!(!html.contains("<script"));
    assert!(!html.contains("<img"));
    assert!(html.contains("<code>&lt;img src=x&gt;</code>"));
    assert!(!html.contains("http://"));
    assert!(!html.contains("https://"));
}
