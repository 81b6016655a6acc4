use thiserror::Error;

/// Main error type for the reply agent
#[derive(Error, Debug)]
pub enum PilotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Proxy isolation errors (fatal to the agent)
    #[error("Proxy not applied: expected egress {expected}, observed {observed}")]
    ProxyNotApplied { expected: String, observed: String },

    #[error("Proxy egress check failed: {0}")]
    ProxyUnreachable(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The reply request was accepted but its result could not be read back
    #[error("Reply outcome unknown: {0}")]
    ReplyUnconfirmed(String),

    // Generation collaborator
    #[error("Generation error: {0}")]
    Generation(String),

    // Ledger errors
    #[error("Ledger write failed: {0}")]
    LedgerWrite(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotError {
    /// Errors that must stop the current agent's run instead of skipping an item.
    pub fn is_fatal_to_agent(&self) -> bool {
        matches!(
            self,
            PilotError::ProxyNotApplied { .. } | PilotError::ProxyUnreachable(_)
        )
    }
}

/// Result type alias for PilotError
pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let mismatch = PilotError::ProxyNotApplied {
            expected: "10.0.0.1".into(),
            observed: "192.168.1.9".into(),
        };
        assert!(mismatch.is_fatal_to_agent());
        assert!(PilotError::ProxyUnreachable("timeout".into()).is_fatal_to_agent());

        assert!(!PilotError::Platform("503".into()).is_fatal_to_agent());
        assert!(!PilotError::LedgerWrite("disk full".into()).is_fatal_to_agent());
        assert!(!PilotError::Generation("empty".into()).is_fatal_to_agent());
        assert!(!PilotError::ReplyUnconfirmed("no body".into()).is_fatal_to_agent());
    }

    #[test]
    fn test_proxy_error_message_names_both_addresses() {
        let err = PilotError::ProxyNotApplied {
            expected: "10.0.0.1".into(),
            observed: "192.168.1.9".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("192.168.1.9"));
    }
}
