mod common;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Method;
use serde_json::json;
use std::time::{Duration, Instant};
use threadpilot::adapters::EgressCheck;
use threadpilot::error::PilotError;

use common::{direct_transport, local_agent, rate_config, spawn};

fn rate_headers(remaining: &'static str, reset: &'static str, used: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from_static(reset));
    headers.insert("x-ratelimit-used", HeaderValue::from_static(used));
    headers
}

#[tokio::test]
async fn test_response_headers_update_budget() {
    let app = Router::new()
        .route("/healthy", get(|| async { (rate_headers("120", "30", "480"), "ok") }))
        .route("/bare", get(|| async { "ok" }));
    let addr = spawn(app).await;
    let agent = local_agent("agent0", addr);
    let transport = direct_transport(&agent, addr, &rate_config(50.0, 5.0));

    let url = format!("http://{}/healthy", addr);
    let resp = transport.send(transport.request(Method::GET, &url)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let state = transport.tracker().state().await.unwrap();
    assert_eq!(state.remaining, 120.0);
    assert_eq!(state.reset_secs, 30.0);
    assert_eq!(state.used, 480.0);

    // No quota headers: request proceeds and the last snapshot is kept
    let start = Instant::now();
    let url = format!("http://{}/bare", addr);
    transport.send(transport.request(Method::GET, &url)).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.tracker().state().await.unwrap().remaining, 120.0);
}

#[tokio::test]
async fn test_low_budget_blocks_before_returning() {
    let app = Router::new().route("/low", get(|| async { (rate_headers("3", "0.2", "597"), "ok") }));
    let addr = spawn(app).await;
    let agent = local_agent("agent0", addr);
    let transport = direct_transport(&agent, addr, &rate_config(50.0, 0.3));

    let start = Instant::now();
    let url = format!("http://{}/low", addr);
    transport.send(transport.request(Method::GET, &url)).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_egress_matching_proxy_is_accepted() {
    let app = Router::new().route("/ip", get(|| async { Json(json!({"ip": "127.0.0.1"})) }));
    let addr = spawn(app).await;
    let agent = local_agent("agent0", addr);
    let transport = direct_transport(&agent, addr, &rate_config(50.0, 5.0));

    let ip = transport.verify_egress().await.unwrap();
    assert_eq!(ip.to_string(), "127.0.0.1");
}

#[tokio::test]
async fn test_egress_mismatch_is_fatal() {
    let app = Router::new().route("/ip", get(|| async { Json(json!({"ip": "203.0.113.9"})) }));
    let addr = spawn(app).await;
    let agent = local_agent("agent0", addr);
    let transport = direct_transport(&agent, addr, &rate_config(50.0, 5.0));

    let err = transport.verify_egress().await.unwrap_err();
    match &err {
        PilotError::ProxyNotApplied { expected, observed } => {
            assert_eq!(expected, "127.0.0.1");
            assert_eq!(observed, "203.0.113.9");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal_to_agent());
}

#[tokio::test]
async fn test_failing_egress_check_is_fatal() {
    let app = Router::new().route(
        "/ip",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down").into_response() }),
    );
    let addr = spawn(app).await;
    let agent = local_agent("agent0", addr);
    let transport = direct_transport(&agent, addr, &rate_config(50.0, 5.0));

    let err = transport.verify_egress().await.unwrap_err();
    assert!(matches!(err, PilotError::ProxyUnreachable(_)));
    assert!(err.is_fatal_to_agent());
}
