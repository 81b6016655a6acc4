//! Wiring for one agent's session: tracker, proxied transport, platform
//! client, ledger, and orchestrator, built fresh per agent.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::orchestrator::{Orchestrator, RunSettings, RunSummary};
use super::planner::CrawlPlanner;
use crate::adapters::{EgressCheck, RateBudgetTracker, RedditClient, ThrottledTransport, TransportOptions};
use crate::config::AppConfig;
use crate::coordination::StopSignal;
use crate::domain::Agent;
use crate::error::Result;
use crate::persistence::EngagementLedger;
use crate::platform::ReplyGenerator;

/// Per-session switches that come from the command line rather than config
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub dry_run: bool,
    /// Overrides `crawl.post_cap`
    pub post_cap: Option<usize>,
}

/// Build the proxied transport for `agent`
pub fn build_transport(agent: &Agent, config: &AppConfig) -> Result<Arc<ThrottledTransport>> {
    let tracker = Arc::new(RateBudgetTracker::new(&config.rate_limit));
    let options = TransportOptions {
        timeout: Duration::from_secs(config.platform.timeout_secs),
        user_agent: config.platform.user_agent_for(&agent.credentials.username),
        echo_url: config.proxy.echo_url.clone(),
        echo_timeout: Duration::from_secs(config.proxy.timeout_secs),
    };

    Ok(Arc::new(ThrottledTransport::new(
        agent.proxy.clone(),
        tracker,
        &options,
    )?))
}

/// Check the agent's proxy egress without touching the platform
pub async fn check_proxy(agent: &Agent, config: &AppConfig) -> Result<IpAddr> {
    let transport = build_transport(agent, config)?;
    transport.verify_egress().await
}

/// Run one full session for `agent`.
///
/// Returns an error only when the agent's proxy cannot be verified.
pub async fn run_agent(
    agent: &Agent,
    config: &AppConfig,
    generator: Arc<dyn ReplyGenerator>,
    stop: StopSignal,
    options: &SessionOptions,
) -> Result<RunSummary> {
    let transport = build_transport(agent, config)?;
    let platform = Arc::new(RedditClient::new(
        agent.credentials.clone(),
        transport.clone(),
        &config.platform,
    ));

    let ledger = EngagementLedger::load(&config.ledger.path);
    info!(
        "[{}] Ledger {} holds {} records across {} items",
        agent.name,
        ledger.path().display(),
        ledger.record_count(),
        ledger.item_count()
    );

    let settings = RunSettings {
        post_cap: options.post_cap.unwrap_or(config.crawl.post_cap),
        upvote_top_k: config.crawl.upvote_top_k,
        dry_run: options.dry_run,
        pacing: config.pacing.clone(),
    };
    let planner = CrawlPlanner::new(&config.crawl, config.pacing.clone());

    let mut orchestrator = Orchestrator::new(platform, generator, ledger, planner, settings, stop);
    orchestrator.run(agent, transport.as_ref()).await
}
