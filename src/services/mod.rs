pub mod orchestrator;
pub mod pacing;
pub mod planner;
pub mod session;

pub use orchestrator::{ItemOutcome, Orchestrator, RunSettings, RunSummary};
pub use pacing::pace;
pub use planner::{Candidate, CrawlCursor, CrawlPlanner, CrawlStats};
pub use session::{build_transport, check_proxy, run_agent, SessionOptions};
