pub mod rate_budget;
pub mod reddit;
pub mod transport;

pub use rate_budget::{
    AuditTrail, RateBudgetTracker, RateDecision, RateSnapshot, RateState, HEADER_REMAINING,
    HEADER_RESET, HEADER_USED,
};
pub use reddit::RedditClient;
pub use transport::{EgressCheck, ThrottledTransport, TransportOptions};
