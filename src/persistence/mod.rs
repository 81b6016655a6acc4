pub mod ledger;

pub use ledger::{EngagementLedger, EngagementRecord, LedgerEntries, RecordOutcome};
