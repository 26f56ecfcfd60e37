//! Async request pacing shared by every call a client makes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Enforces a minimum interval between consecutive requests; clones share the same pacing window.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Limiter that never waits, used for local servers and tests.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Waits out the remaining cooldown, records the call and returns how long it slept.
    pub async fn hit(&self) -> Duration {
        let mut guard = self.last_call.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                waited = self.cooldown - elapsed;
                sleep(waited).await;
            }
        }
        *guard = Some(Instant::now());
        waited
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
