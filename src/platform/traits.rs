use async_trait::async_trait;

use crate::domain::{Comment, ContentItem, ReplyHandle};
use crate::error::Result;

/// Social platform capability used by the crawl and the orchestrator.
///
/// Every failure is item-scoped; callers skip the current item and continue.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Up to `limit` items in `community` matching `term`
    async fn search(&self, community: &str, term: &str, limit: usize) -> Result<Vec<ContentItem>>;

    /// The item's whole comment tree, flattened
    async fn comments(&self, item_id: &str) -> Result<Vec<Comment>>;

    async fn reply(&self, item_id: &str, text: &str) -> Result<ReplyHandle>;

    async fn upvote(&self, comment_id: &str) -> Result<()>;
}

/// Text generation collaborator.
///
/// Implementations report upstream failures as `None` and never raise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, title: &str, body: &str) -> Option<String>;
}
