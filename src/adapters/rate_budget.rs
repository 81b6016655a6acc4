//! Rate budget tracking
//!
//! Ingests the platform's self-reported quota headers after every call and
//! blocks the caller when the remaining budget drops below a threshold.
//! Missing headers never cause a pause.

use chrono::{DateTime, Local, Utc};
use reqwest::header::HeaderMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::config::RateLimitConfig;
use crate::error::{PilotError, Result};

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_USED: &str = "x-ratelimit-used";

/// Pause applied when the configured cap is not a representable duration
pub const MAX_PAUSE_FALLBACK: Duration = Duration::from_secs(660);

/// Quota values reported on a single response
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateSnapshot {
    pub remaining: Option<f64>,
    pub reset_secs: Option<f64>,
    pub used: Option<f64>,
}

impl RateSnapshot {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        Self {
            remaining: parse(HEADER_REMAINING),
            reset_secs: parse(HEADER_RESET),
            used: parse(HEADER_USED),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.reset_secs.is_none() && self.used.is_none()
    }
}

/// Most recently observed quota
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    pub remaining: f64,
    pub reset_secs: f64,
    pub used: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Proceed,
    Pause(Duration),
}

/// Append-only text log of observed snapshots.
///
/// Writes go through a lossy non-blocking worker; write failures are dropped.
pub struct AuditTrail {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl AuditTrail {
    pub fn open(path: &Path) -> Result<Self> {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                PilotError::Validation(format!("audit log path has no file name: {}", path.display()))
            })?
            .to_string_lossy()
            .into_owned();

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(directory)
            .map_err(|e| PilotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let (writer, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
            .lossy(true)
            .finish(appender);

        Ok(Self {
            writer,
            _guard: guard,
        })
    }

    pub fn format_line(at: DateTime<Local>, state: &RateState) -> String {
        format!(
            "{} | Used: {} | Remaining: {} | Reset in: {:.0}s\n",
            at.format("%Y-%m-%d %H:%M:%S"),
            state.used,
            state.remaining,
            state.reset_secs
        )
    }

    fn append(&self, state: &RateState) {
        let line = Self::format_line(Local::now(), state);
        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(line.as_bytes()) {
            debug!("rate audit write dropped: {}", e);
        }
    }
}

/// Tracks the platform's quota for one transport
pub struct RateBudgetTracker {
    threshold: f64,
    safety_margin_secs: f64,
    max_pause_secs: f64,
    state: Mutex<Option<RateState>>,
    audit: Option<AuditTrail>,
}

impl RateBudgetTracker {
    pub fn new(config: &RateLimitConfig) -> Self {
        let audit = config.audit_log_path.as_deref().and_then(|path| {
            match AuditTrail::open(path) {
                Ok(trail) => Some(trail),
                Err(e) => {
                    warn!("Rate audit trail disabled ({}): {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            threshold: config.threshold,
            safety_margin_secs: config.safety_margin_secs,
            max_pause_secs: config.max_pause_secs,
            state: Mutex::new(None),
            audit,
        }
    }

    /// Latest observed snapshot, if any response carried quota headers
    pub async fn state(&self) -> Option<RateState> {
        *self.state.lock().await
    }

    /// Record a snapshot and sleep when the remaining budget is low.
    ///
    /// Returns the decision that was applied.
    pub async fn observe(&self, snapshot: RateSnapshot) -> RateDecision {
        let decision = self.ingest(snapshot).await;

        if let RateDecision::Pause(pause) = decision {
            warn!(
                "⏳ Sleeping for {:.0} seconds to respect rate limit...",
                pause.as_secs_f64()
            );
            tokio::time::sleep(pause).await;
        }

        decision
    }

    /// Update state from a snapshot and decide, without sleeping
    pub async fn ingest(&self, snapshot: RateSnapshot) -> RateDecision {
        let mut guard = self.state.lock().await;

        let Some(remaining) = snapshot.remaining else {
            // No quota telemetry: fail open. A bare `used` count still refreshes
            // the existing snapshot's counter.
            if let (Some(used), Some(state)) = (snapshot.used, guard.as_mut()) {
                state.used = used;
            }
            return RateDecision::Proceed;
        };

        let previous_used = guard.as_ref().map(|s| s.used).unwrap_or(0.0);
        let state = RateState {
            remaining,
            reset_secs: snapshot.reset_secs.unwrap_or(0.0).max(0.0),
            used: snapshot.used.unwrap_or(previous_used),
            observed_at: Utc::now(),
        };
        *guard = Some(state);
        drop(guard);

        info!(
            "📊 Rate Limit | Used: {} | Remaining: {} | Reset in: {:.0}s",
            state.used, state.remaining, state.reset_secs
        );
        if let Some(audit) = &self.audit {
            audit.append(&state);
        }

        self.decide(&state)
    }

    fn decide(&self, state: &RateState) -> RateDecision {
        if state.remaining >= self.threshold {
            return RateDecision::Proceed;
        }

        let cap = Duration::try_from_secs_f64(self.max_pause_secs).unwrap_or(MAX_PAUSE_FALLBACK);
        let secs = (state.reset_secs + self.safety_margin_secs).max(0.0);
        let pause = Duration::try_from_secs_f64(secs).map_or(cap, |d| d.min(cap));
        RateDecision::Pause(pause)
    }
}
