//! Proxy-bound HTTP transport
//!
//! Every platform call leaves through one proxy for the life of the session
//! and reports its rate-limit headers to the [`RateBudgetTracker`] before the
//! response is handed back.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::rate_budget::{RateBudgetTracker, RateSnapshot};
use crate::domain::ProxyEndpoint;
use crate::error::{PilotError, Result};

/// Confirms that outbound traffic really leaves through the configured proxy
#[async_trait]
pub trait EgressCheck: Send + Sync {
    /// Returns the observed egress address, or a fatal proxy error
    async fn verify_egress(&self) -> Result<IpAddr>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub user_agent: String,
    /// Endpoint answering `{"ip": "<caller address>"}`
    pub echo_url: String,
    pub echo_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EchoResponse {
    ip: String,
}

/// HTTP transport bound to a single proxy with rate budget tracking
pub struct ThrottledTransport {
    http: Client,
    proxy: ProxyEndpoint,
    tracker: Arc<RateBudgetTracker>,
    echo_url: String,
    echo_timeout: Duration,
}

impl ThrottledTransport {
    /// Create a transport routing all traffic through `proxy`
    pub fn new(
        proxy: ProxyEndpoint,
        tracker: Arc<RateBudgetTracker>,
        options: &TransportOptions,
    ) -> Result<Self> {
        let http = Client::builder()
            .proxy(reqwest::Proxy::all(proxy.as_str())?)
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .map_err(|e| PilotError::Platform(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(http, proxy, tracker, options))
    }

    /// Wrap a prebuilt client. The client is expected to route through `proxy`.
    pub fn with_client(
        http: Client,
        proxy: ProxyEndpoint,
        tracker: Arc<RateBudgetTracker>,
        options: &TransportOptions,
    ) -> Self {
        Self {
            http,
            proxy,
            tracker,
            echo_url: options.echo_url.clone(),
            echo_timeout: options.echo_timeout,
        }
    }

    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    pub fn tracker(&self) -> &Arc<RateBudgetTracker> {
        &self.tracker
    }

    /// Start a request on the proxied client
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Send a request and feed its rate-limit headers to the tracker.
    ///
    /// A low budget blocks here, before the response reaches the caller.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let snapshot = RateSnapshot::from_headers(response.headers());
        if snapshot.is_empty() {
            debug!("No rate-limit headers on response from {}", response.url());
        }
        self.tracker.observe(snapshot).await;
        Ok(response)
    }

    /// Addresses the egress is allowed to show up as
    async fn expected_egress(&self) -> Vec<IpAddr> {
        if let Some(ip) = self.proxy.ip() {
            return vec![ip];
        }

        match tokio::net::lookup_host((self.proxy.host(), self.proxy.port())).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                warn!("Could not resolve proxy host {}: {}", self.proxy.host(), e);
                Vec::new()
            }
        }
    }

    async fn lookup_egress(&self) -> Result<IpAddr> {
        let response = self
            .http
            .get(&self.echo_url)
            .timeout(self.echo_timeout)
            .send()
            .await
            .map_err(|e| PilotError::ProxyUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PilotError::ProxyUnreachable(format!(
                "egress echo {} returned status {}",
                self.echo_url, status
            )));
        }

        let body: EchoResponse = response
            .json()
            .await
            .map_err(|e| PilotError::ProxyUnreachable(format!("invalid egress echo response: {}", e)))?;

        body.ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| PilotError::ProxyUnreachable(format!("egress echo returned non-address '{}'", body.ip)))
    }
}

#[async_trait]
impl EgressCheck for ThrottledTransport {
    async fn verify_egress(&self) -> Result<IpAddr> {
        let observed = self.lookup_egress().await?;
        let expected = self.expected_egress().await;

        if !expected.contains(&observed) {
            return Err(PilotError::ProxyNotApplied {
                expected: self.proxy.host(),
                observed: observed.to_string(),
            });
        }

        info!("Proxy verified: egress {} via {}", observed, self.proxy);
        Ok(observed)
    }
}
