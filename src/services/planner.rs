//! Crawl planner
//!
//! Walks communities × search terms in order and hands out items that pass
//! the recency and already-engaged filters, one at a time. Each cursor
//! re-runs the searches, so results can drift between runs.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::pacing::pace;
use crate::config::{CrawlConfig, PacingConfig};
use crate::coordination::StopSignal;
use crate::domain::{ContentItem, ItemProgress, Rejection};
use crate::persistence::EngagementLedger;
use crate::platform::PlatformClient;

/// An item that survived both filters
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: ContentItem,
    pub community: String,
    pub term: String,
    /// Sits at `DedupChecked` when handed out
    pub progress: ItemProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub searches: usize,
    pub search_failures: usize,
    pub discovered: usize,
    pub rejected_stale: usize,
    pub rejected_engaged: usize,
    pub yielded: usize,
}

#[derive(Debug)]
struct Plan {
    communities: Vec<String>,
    terms: Vec<String>,
    per_term_limit: usize,
    max_age: Duration,
    pacing: PacingConfig,
}

#[derive(Debug, Clone)]
pub struct CrawlPlanner {
    plan: Arc<Plan>,
}

impl CrawlPlanner {
    pub fn new(crawl: &CrawlConfig, pacing: PacingConfig) -> Self {
        Self::with_max_age(crawl, pacing, crawl.max_age())
    }

    /// Same search space with a different recency window
    pub fn with_max_age(crawl: &CrawlConfig, pacing: PacingConfig, max_age: Duration) -> Self {
        Self {
            plan: Arc::new(Plan {
                communities: crawl.communities.clone(),
                terms: crawl.terms.clone(),
                per_term_limit: crawl.per_term_limit,
                max_age,
                pacing,
            }),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.plan.max_age
    }

    /// Apply the recency filter, then the dedup filter
    pub fn screen(
        &self,
        item: &ContentItem,
        now: DateTime<Utc>,
        ledger: &EngagementLedger,
        agent: &str,
    ) -> Result<(), Rejection> {
        if !item.is_recent(now, self.plan.max_age) {
            return Err(Rejection::Stale);
        }
        if ledger.has_acted(&item.id, agent) {
            return Err(Rejection::AlreadyEngaged);
        }
        Ok(())
    }

    /// A fresh pass over the whole search space for `agent`
    pub fn cursor(&self, agent: &str) -> CrawlCursor {
        CrawlCursor {
            planner: self.clone(),
            agent: agent.to_string(),
            next_pair: 0,
            current: None,
            buffer: VecDeque::new(),
            stats: CrawlStats::default(),
        }
    }
}

/// Lazy position within one crawl pass
pub struct CrawlCursor {
    planner: CrawlPlanner,
    agent: String,
    next_pair: usize,
    current: Option<(String, String)>,
    buffer: VecDeque<ContentItem>,
    stats: CrawlStats,
}

impl CrawlCursor {
    fn plan(&self) -> &Plan {
        &self.planner.plan
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    fn pair(&self, index: usize) -> Option<(usize, usize)> {
        let terms = self.plan().terms.len();
        if terms == 0 || index >= self.plan().communities.len() * terms {
            return None;
        }
        Some((index / terms, index % terms))
    }

    /// Next surviving item, or `None` once the plan is exhausted or a stop
    /// was requested.
    ///
    /// The ledger is consulted at yield time, so records written between
    /// calls are honored.
    pub async fn next(
        &mut self,
        platform: &dyn PlatformClient,
        ledger: &EngagementLedger,
        stop: &StopSignal,
    ) -> Option<Candidate> {
        loop {
            if stop.is_stopped() {
                return None;
            }

            while let Some(item) = self.buffer.pop_front() {
                self.stats.discovered += 1;
                let verdict = self.planner.screen(&item, Utc::now(), ledger, &self.agent);
                let mut progress = ItemProgress::discovered(&item.id);
                progress.screened(verdict);
                match verdict {
                    Ok(()) => {
                        if !pace(self.plan().pacing.item, stop).await {
                            return None;
                        }
                        self.stats.yielded += 1;
                        let (community, term) = self.current.clone().unwrap_or_default();
                        return Some(Candidate {
                            item,
                            community,
                            term,
                            progress,
                        });
                    }
                    Err(Rejection::Stale) => {
                        self.stats.rejected_stale += 1;
                        debug!(
                            "Skipping {}: older than {:?} ({})",
                            item.id,
                            self.plan().max_age,
                            progress.state()
                        );
                    }
                    Err(Rejection::AlreadyEngaged) => {
                        self.stats.rejected_engaged += 1;
                        debug!(
                            "Skipping {}: already engaged by {} ({})",
                            item.id,
                            self.agent,
                            progress.state()
                        );
                    }
                }
            }

            let (community_idx, term_idx) = self.pair(self.next_pair)?;
            self.next_pair += 1;
            let community = self.plan().communities[community_idx].clone();
            let term = self.plan().terms[term_idx].clone();

            if term_idx == 0 {
                info!("[{}] Searching r/{}", self.agent, community);
                if !pace(self.plan().pacing.community, stop).await {
                    return None;
                }
            }
            if !pace(self.plan().pacing.search, stop).await {
                return None;
            }

            self.stats.searches += 1;
            match platform
                .search(&community, &term, self.plan().per_term_limit)
                .await
            {
                Ok(mut items) => {
                    items.truncate(self.plan().per_term_limit);
                    debug!("r/{} '{}': {} results", community, term, items.len());
                    self.buffer = items.into();
                }
                Err(e) => {
                    self.stats.search_failures += 1;
                    warn!("Error searching [{}] with keyword [{}]: {}", community, term, e);
                }
            }
            self.current = Some((community, term));
        }
    }
}
