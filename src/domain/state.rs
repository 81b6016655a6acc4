use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PilotError, Result};

/// Lifecycle of one discovered item within a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Returned by a search
    Discovered,
    /// Inside the recency window
    RecencyChecked,
    /// Not yet engaged by the current agent
    DedupChecked,
    /// Top comments upvoted (or nothing to upvote)
    CommentsEngaged,
    /// Generation collaborator invoked
    GenerationAttempted,
    /// Reply sent and ledger record persisted
    RepliedAndRecorded,
    /// Reply sent (or possibly sent) but no ledger record exists
    SentUnrecorded,
    /// Abandoned without any ledger record; eligible again next run
    SkippedNoRecord,
    /// Dropped by the recency or dedup filter
    RejectedByFilter,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Discovered => "DISCOVERED",
            ItemState::RecencyChecked => "RECENCY_CHECKED",
            ItemState::DedupChecked => "DEDUP_CHECKED",
            ItemState::CommentsEngaged => "COMMENTS_ENGAGED",
            ItemState::GenerationAttempted => "GENERATION_ATTEMPTED",
            ItemState::RepliedAndRecorded => "REPLIED_AND_RECORDED",
            ItemState::SentUnrecorded => "SENT_UNRECORDED",
            ItemState::SkippedNoRecord => "SKIPPED_NO_RECORD",
            ItemState::RejectedByFilter => "REJECTED_BY_FILTER",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: ItemState) -> bool {
        use ItemState::*;

        match (self, target) {
            // Filtering
            (Discovered, RecencyChecked) => true,
            (Discovered, RejectedByFilter) => true,
            (RecencyChecked, DedupChecked) => true,
            (RecencyChecked, RejectedByFilter) => true,

            // Side effects
            (DedupChecked, CommentsEngaged) => true,
            (CommentsEngaged, GenerationAttempted) => true,
            (GenerationAttempted, RepliedAndRecorded) => true,
            (GenerationAttempted, SentUnrecorded) => true,

            // Any failure after filtering leaves no record behind
            (DedupChecked, SkippedNoRecord) => true,
            (CommentsEngaged, SkippedNoRecord) => true,
            (GenerationAttempted, SkippedNoRecord) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Is this a terminal state for the item?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::RepliedAndRecorded
                | ItemState::SentUnrecorded
                | ItemState::SkippedNoRecord
                | ItemState::RejectedByFilter
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the crawl filters dropped an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Older than the recency window
    Stale,
    /// Current agent already has a ledger record for it
    AlreadyEngaged,
}

/// Tracks a single item through the state machine
#[derive(Debug, Clone)]
pub struct ItemProgress {
    item_id: String,
    state: ItemState,
}

impl ItemProgress {
    /// Start tracking an item fresh out of a search
    pub fn discovered(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            state: ItemState::Discovered,
        }
    }

    /// Walk the filter steps for a screening verdict.
    ///
    /// Ends in `DedupChecked` when the item survived, `RejectedByFilter`
    /// otherwise. Returns whether it survived.
    pub fn screened(&mut self, verdict: std::result::Result<(), Rejection>) -> bool {
        use ItemState::*;

        let path: &[ItemState] = match verdict {
            Ok(()) => &[RecencyChecked, DedupChecked],
            Err(Rejection::Stale) => &[RejectedByFilter],
            Err(Rejection::AlreadyEngaged) => &[RecencyChecked, RejectedByFilter],
        };
        path.iter().all(|&to| self.advance(to).is_ok()) && verdict.is_ok()
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn advance(&mut self, to: ItemState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(PilotError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::trace!(item = %self.item_id, from = %self.state, to = %to, "item transition");
        self.state = to;
        Ok(())
    }

    /// Move to `SkippedNoRecord` unless the item already reached a terminal state.
    ///
    /// A sent-but-unrecorded reply keeps its own terminal state.
    pub fn abandon(&mut self) {
        if !self.state.is_terminal() {
            self.state = ItemState::SkippedNoRecord;
        }
    }
}
