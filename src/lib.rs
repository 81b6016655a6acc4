pub mod adapters;
pub mod agent;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod platform;
pub mod services;

pub use adapters::{RateBudgetTracker, RateDecision, RateSnapshot, RedditClient, ThrottledTransport};
pub use agent::ChatReplyGenerator;
pub use config::AppConfig;
pub use coordination::StopSignal;
pub use domain::{Agent, Comment, ContentItem, ItemState};
pub use error::{PilotError, Result};
pub use persistence::{EngagementLedger, EngagementRecord};
pub use platform::{PlatformClient, ReplyGenerator};
pub use services::{CrawlPlanner, Orchestrator, RunSummary};
