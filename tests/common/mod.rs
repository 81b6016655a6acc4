#![allow(dead_code)]

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use threadpilot::adapters::{RateBudgetTracker, ThrottledTransport, TransportOptions};
use threadpilot::config::{AgentConfig, RateLimitConfig};
use threadpilot::domain::Agent;

/// Serve `app` on an ephemeral local port
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn rate_config(threshold: f64, margin: f64) -> RateLimitConfig {
    RateLimitConfig {
        threshold,
        safety_margin_secs: margin,
        max_pause_secs: 5.0,
        audit_log_path: None,
    }
}

/// Agent whose "proxy" is the local fixture, so the egress check matches
pub fn local_agent(name: &str, addr: SocketAddr) -> Agent {
    Agent::from_config(&AgentConfig {
        name: name.to_string(),
        client_id: "cid".to_string(),
        client_secret: "csecret".to_string(),
        username: format!("{}_user", name),
        password: "pw".to_string(),
        proxy: format!("http://127.0.0.1:{}", addr.port()),
    })
    .unwrap()
}

/// Transport talking to the fixture directly; the proxy endpoint only feeds
/// the egress comparison.
pub fn direct_transport(agent: &Agent, addr: SocketAddr, rate: &RateLimitConfig) -> Arc<ThrottledTransport> {
    let http = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let options = TransportOptions {
        timeout: Duration::from_secs(5),
        user_agent: "threadpilot-test".to_string(),
        echo_url: format!("http://{}/ip", addr),
        echo_timeout: Duration::from_secs(2),
    };
    Arc::new(ThrottledTransport::with_client(
        http,
        agent.proxy.clone(),
        Arc::new(RateBudgetTracker::new(rate)),
        &options,
    ))
}
