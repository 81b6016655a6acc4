//! Per-agent crawl loop
//!
//! Verifies proxy egress, then pulls candidates from the planner until the
//! post budget, the plan, or a stop request runs out. For each candidate:
//! upvote the top comments, generate a reply, post it, and only then record
//! it in the ledger.
//!
//! There is no retry loop here. An item that fails anywhere before the
//! ledger write stays unrecorded and the planner offers it again next run.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::pacing::pace;
use super::planner::{Candidate, CrawlCursor, CrawlPlanner, CrawlStats};
use crate::adapters::EgressCheck;
use crate::config::PacingConfig;
use crate::coordination::StopSignal;
use crate::domain::{top_comments, Agent, ContentItem, ItemProgress, ItemState, ReplyHandle};
use crate::error::{PilotError, Result};
use crate::persistence::{EngagementLedger, RecordOutcome};
use crate::platform::{PlatformClient, ReplyGenerator};

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Successful recorded replies before the run ends
    pub post_cap: usize,
    pub upvote_top_k: usize,
    /// Generate and log replies without any upvote, reply, or ledger write
    pub dry_run: bool,
    pub pacing: PacingConfig,
}

/// What happened to a candidate that reached the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Replied(ReplyHandle),
    /// The reply is (or may be) live but has no ledger record. `handle` is
    /// `None` when the platform's answer could not be read.
    SentUnrecorded {
        handle: Option<ReplyHandle>,
        reason: String,
    },
    /// Dry run: generated, not posted
    Previewed,
    /// Recorded by another run since the candidate was screened
    AlreadyEngaged,
    /// Generation returned nothing
    NoGeneration,
    /// A stop arrived while engaging comments; nothing was generated or sent
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub agent: String,
    pub posted: usize,
    pub previewed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Replies sent without a ledger record; may be duplicated by a later run
    pub unrecorded: usize,
    pub stopped_early: bool,
    pub crawl: CrawlStats,
}

pub struct Orchestrator {
    platform: Arc<dyn PlatformClient>,
    generator: Arc<dyn ReplyGenerator>,
    ledger: EngagementLedger,
    planner: CrawlPlanner,
    settings: RunSettings,
    stop: StopSignal,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        generator: Arc<dyn ReplyGenerator>,
        ledger: EngagementLedger,
        planner: CrawlPlanner,
        settings: RunSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            platform,
            generator,
            ledger,
            planner,
            settings,
            stop,
        }
    }

    pub fn ledger(&self) -> &EngagementLedger {
        &self.ledger
    }

    /// Run one agent's session.
    ///
    /// Fails only when proxy egress cannot be verified; in that case nothing
    /// is searched and the ledger is not touched. Every item-level failure is
    /// logged and skipped.
    pub async fn run(&mut self, agent: &Agent, egress: &dyn EgressCheck) -> Result<RunSummary> {
        let egress_ip = egress.verify_egress().await?;
        info!(
            "Running agent: {} on proxy: {} (egress {})",
            agent.name, agent.proxy, egress_ip
        );

        let mut summary = RunSummary {
            agent: agent.name.clone(),
            ..RunSummary::default()
        };
        let mut cursor = self.planner.cursor(&agent.name);

        while summary.posted < self.settings.post_cap {
            if self.stop.is_stopped() {
                break;
            }
            let Some(mut candidate) = self.next_candidate(&mut cursor).await else {
                break;
            };

            match self.handle_item(agent, &mut candidate).await {
                Ok(ItemOutcome::Replied(handle)) => {
                    summary.posted += 1;
                    info!(
                        "[{}] Replied to {} in r/{} ({}/{}): {}",
                        agent.name,
                        candidate.item.id,
                        candidate.community,
                        summary.posted,
                        self.settings.post_cap,
                        handle.permalink.as_deref().unwrap_or(&handle.id)
                    );
                    if summary.posted < self.settings.post_cap {
                        pace(self.settings.pacing.reply, &self.stop).await;
                    }
                }
                Ok(ItemOutcome::SentUnrecorded { handle, reason }) => {
                    summary.unrecorded += 1;
                    error!(
                        "[{}] Reply {} to {} was SENT but NOT RECORDED ({}); a later run may reply again",
                        agent.name,
                        handle.as_ref().map(|h| h.id.as_str()).unwrap_or("<unknown id>"),
                        candidate.item.id,
                        reason
                    );
                }
                Ok(ItemOutcome::Previewed) => summary.previewed += 1,
                Ok(ItemOutcome::AlreadyEngaged) => {
                    summary.skipped += 1;
                    debug!("[{}] {} engaged since screening", agent.name, candidate.item.id);
                }
                Ok(ItemOutcome::NoGeneration) => {
                    summary.skipped += 1;
                    warn!(
                        "[{}] No reply generated for {}; left for a later run",
                        agent.name, candidate.item.id
                    );
                }
                Ok(ItemOutcome::Stopped) => {
                    info!(
                        "[{}] Stopped while engaging {}; no reply sent",
                        agent.name, candidate.item.id
                    );
                }
                Err(e) if e.is_fatal_to_agent() => return Err(e),
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        "[{}] Skipping {} (r/{}, '{}'): {}",
                        agent.name, candidate.item.id, candidate.community, candidate.term, e
                    );
                }
            }

            debug!(
                "[{}] {} ended in {}",
                agent.name,
                candidate.item.id,
                candidate.progress.state()
            );
        }

        summary.stopped_early = self.stop.is_stopped();
        summary.crawl = cursor.stats().clone();
        info!(
            "[{}] Run finished: posted={} previewed={} skipped={} failed={} unrecorded={} searches={}{}",
            agent.name,
            summary.posted,
            summary.previewed,
            summary.skipped,
            summary.failed,
            summary.unrecorded,
            summary.crawl.searches,
            if summary.stopped_early { " (stopped)" } else { "" }
        );

        Ok(summary)
    }

    async fn next_candidate(&self, cursor: &mut CrawlCursor) -> Option<Candidate> {
        cursor
            .next(self.platform.as_ref(), &self.ledger, &self.stop)
            .await
    }

    /// Process one candidate and settle its progress in a terminal state
    async fn handle_item(&mut self, agent: &Agent, candidate: &mut Candidate) -> Result<ItemOutcome> {
        let outcome = self
            .process_item(agent, &candidate.item, &mut candidate.progress)
            .await;
        candidate.progress.abandon();
        outcome
    }

    async fn process_item(
        &mut self,
        agent: &Agent,
        item: &ContentItem,
        progress: &mut ItemProgress,
    ) -> Result<ItemOutcome> {
        // Re-read the ledger immediately before acting
        self.ledger.refresh();
        if self.ledger.has_acted(&item.id, &agent.name) {
            return Ok(ItemOutcome::AlreadyEngaged);
        }

        if !self.engage_comments(&item.id).await? {
            return Ok(ItemOutcome::Stopped);
        }
        progress.advance(ItemState::CommentsEngaged)?;

        let generated = self.generator.generate(&item.title, &item.body).await;
        progress.advance(ItemState::GenerationAttempted)?;
        let Some(text) = generated else {
            return Ok(ItemOutcome::NoGeneration);
        };

        if self.settings.dry_run {
            info!(
                "[{}] Dry run, would reply to {} '{}':\n{}",
                agent.name, item.id, item.title, text
            );
            return Ok(ItemOutcome::Previewed);
        }

        let handle = match self.platform.reply(&item.id, &text).await {
            Ok(handle) => handle,
            Err(PilotError::ReplyUnconfirmed(reason)) => {
                progress.advance(ItemState::SentUnrecorded)?;
                return Ok(ItemOutcome::SentUnrecorded {
                    handle: None,
                    reason,
                });
            }
            Err(e) => return Err(e),
        };

        match self.ledger.record(&item.id, &agent.name, &text, Utc::now()) {
            Ok(RecordOutcome::Recorded) | Ok(RecordOutcome::AlreadyRecorded) => {
                progress.advance(ItemState::RepliedAndRecorded)?;
                Ok(ItemOutcome::Replied(handle))
            }
            Err(e) => {
                progress.advance(ItemState::SentUnrecorded)?;
                Ok(ItemOutcome::SentUnrecorded {
                    handle: Some(handle),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Upvote the top-ranked valid comments, pacing between votes.
    ///
    /// Returns `false` when a stop cut the pacing short; the item must not
    /// go on to a reply.
    async fn engage_comments(&self, item_id: &str) -> Result<bool> {
        let comments = self.platform.comments(item_id).await?;
        let top = top_comments(comments, self.settings.upvote_top_k);

        for comment in &top {
            if self.settings.dry_run {
                debug!("Dry run, would upvote {} (score {})", comment.id, comment.score);
                continue;
            }
            self.platform.upvote(&comment.id).await?;
            if !pace(self.settings.pacing.upvote, &self.stop).await {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
