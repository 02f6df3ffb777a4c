//! Background enforcement of TTLs and size bounds

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use std::{sync::Arc, time::Duration};

use crate::{
    cache::ResponseCache,
    csrf::CsrfStore,
    rate_limit::RateLimiter,
    time::TimeSource,
};

pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Handle to the periodic sweep task.
///
/// One task runs all sweeps sequentially, so ticks can never overlap; a
/// tick that falls due while a sweep is still running is skipped.
pub(crate) struct Sweeper {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Sweeper {
    /// Spawns the sweep task over the three bounded stores.
    pub(crate) fn spawn(
        interval: Duration,
        limiter: Arc<RateLimiter>,
        csrf: Arc<CsrfStore>,
        cache: Arc<ResponseCache>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh engine
            // does not sweep empty stores.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = clock.now_millis();
                        let counters = limiter.sweep(now);
                        let tokens = csrf.sweep(now);
                        let entries = cache.sweep(now);
                        if counters + tokens + entries > 0 {
                            tracing::debug!(counters, tokens, entries, "sweep removed expired state");
                        }
                    }
                }
            }
        });

        Self { handle, cancel }
    }

    /// Stops the task, letting an in-flight sweep finish within a short
    /// grace window before it is aborted.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        let mut handle = self.handle;
        if time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            handle.abort();
            tracing::warn!("sweep still running at shutdown; aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, MemoryStore};
    use crate::csrf::CsrfConfig;
    use crate::http::GatewayResponse;
    use crate::rate_limit::RateLimitConfig;
    use crate::time::MockTimeSource;
    use hyper::StatusCode;

    fn make_parts(clock: MockTimeSource) -> (Arc<RateLimiter>, Arc<CsrfStore>, Arc<ResponseCache>) {
        let clock: Arc<dyn TimeSource> = Arc::new(clock);
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone()));
        let csrf = Arc::new(CsrfStore::new(CsrfConfig::default(), clock.clone()));
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryStore::new(10)),
            CacheConfig {
                default_ttl: Duration::from_secs(1),
                ..Default::default()
            },
            clock,
        ));
        (limiter, csrf, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn it_sweeps_all_stores_on_tick() {
        let clock = MockTimeSource::new(0);
        let (limiter, csrf, cache) = make_parts(clock.clone());

        limiter.check("1.2.3.4");
        csrf.issue();
        cache.store_response("k".into(), &GatewayResponse::text(StatusCode::OK, "x"));

        let sweeper = Sweeper::spawn(
            Duration::from_secs(5),
            limiter.clone(),
            csrf.clone(),
            cache.clone(),
            Arc::new(clock.clone()),
        );

        // Everything expires, then a tick fires.
        clock.advance_secs(4000);
        time::sleep(Duration::from_secs(6)).await;

        assert!(limiter.is_empty());
        assert!(csrf.is_empty());
        assert_eq!(cache.len(), 0);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn it_stops_on_shutdown() {
        let clock = MockTimeSource::new(0);
        let (limiter, csrf, cache) = make_parts(clock.clone());

        let sweeper = Sweeper::spawn(
            Duration::from_secs(5),
            limiter,
            csrf.clone(),
            cache,
            Arc::new(clock.clone()),
        );

        sweeper.shutdown().await;

        // A token issued after shutdown outlives its TTL in the store.
        csrf.issue();
        clock.advance_secs(4000);
        time::sleep(Duration::from_secs(12)).await;

        assert_eq!(csrf.len(), 1);
    }
}
