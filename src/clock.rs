//! Time source for retry and poll delays

use std::time::Duration;

/// Sleeps on behalf of the monitoring loop.
///
/// The driver races every sleep against cancellation, so implementations only
/// need to wait. Tests inject a clock that records delays and returns at once.
#[async_trait::async_trait]
pub trait Clock: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
