//! Minimum-spacing dispatcher for quota-limited collaborators.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between successive calls.
///
/// Callers queue on the inner lock, which is held across the wait, so calls
/// through one `Throttle` are strictly sequential in their start times.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleep off any remaining deficit since the previous call, then stamp this one.
    ///
    /// Returns the stamped start time of the caller's slot.
    pub async fn wait(&self) -> Instant {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let deficit = self.min_interval - elapsed;
                tracing::trace!(deficit_ms = deficit.as_millis() as u64, "throttling call");
                tokio::time::sleep(deficit).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }

    /// Wait for a slot, then run `call`.
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        self.wait().await;
        call.await
    }
}
