use rand::Rng;
use std::time::Duration;
use tracing::trace;

use crate::config::PacingDelay;
use crate::coordination::StopSignal;

impl PacingDelay {
    /// Draw one delay: base plus uniform jitter
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(self.base_ms + jitter)
    }
}

/// Sleep for a pacing delay, returning early if a stop is requested.
///
/// Returns `false` when the sleep was cut short.
pub async fn pace(delay: PacingDelay, stop: &StopSignal) -> bool {
    let duration = delay.sample(&mut rand::thread_rng());
    if duration.is_zero() {
        return !stop.is_stopped();
    }

    trace!("pacing {:?}", duration);
    tokio::select! {
        _ = tokio::time::sleep(duration) => !stop.is_stopped(),
        _ = stop.stopped() => false,
    }
}
