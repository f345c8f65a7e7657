use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Global pacing for outbound calls.
///
/// Every caller of [`reserve_slot()`](Self::reserve_slot) is granted a slot at
/// least `min_spacing` after the previous grant. Callers queue on a fair
/// mutex, so grants follow arrival order. The throttle knows nothing about
/// rate limits; it only spaces out new calls.
#[derive(Clone)]
pub struct RequestThrottle {
    inner: Arc<Mutex<ThrottleInner>>,
    min_spacing: Duration,
}

struct ThrottleInner {
    last_grant: Option<Instant>,
}

impl RequestThrottle {
    /// Create a throttle with the given minimum spacing between grants.
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThrottleInner { last_grant: None })),
            min_spacing,
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Wait until the next call is allowed, then record the grant.
    ///
    /// The lock is held across the sleep so concurrent callers cannot be
    /// granted inside the same spacing window.
    pub async fn reserve_slot(&self) -> Instant {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_grant {
            let ready_at = last + self.min_spacing;
            let now = Instant::now();
            if now < ready_at {
                trace!(wait_ms = (ready_at - now).as_millis() as u64, "Pacing outbound call");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let granted = Instant::now();
        inner.last_grant = Some(granted);
        granted
    }

    /// Time of the most recent grant, if any.
    pub async fn last_grant(&self) -> Option<Instant> {
        self.inner.lock().await.last_grant
    }
}
