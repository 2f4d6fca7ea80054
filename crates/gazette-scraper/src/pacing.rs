//! Request pacing toward the portal.
//!
//! Every detail page and document fetch waits for a governor permit. When
//! the portal answers 429/503 the pace is halved (down to 1/8 of the base
//! rate) and restored after a quiet minute.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MAX_SLOWDOWN: u32 = 8;
const COOLDOWN: Duration = Duration::from_secs(60);

pub struct PortalPacer {
    limiter: Option<ArcSwap<DirectLimiter>>,
    base_period: Duration,
    current_factor: AtomicU32,
    last_throttled: std::sync::Mutex<Option<Instant>>,
}

fn limiter_for(period: Duration) -> DirectLimiter {
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    DirectLimiter::direct(quota)
}

impl PortalPacer {
    /// `per_second == 0` disables pacing.
    pub fn per_second(per_second: u32) -> Self {
        if per_second == 0 {
            return Self::unpaced();
        }
        let period = Duration::from_millis(1000 / per_second as u64).max(Duration::from_millis(1));
        Self {
            limiter: Some(ArcSwap::from(Arc::new(limiter_for(period)))),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_throttled: std::sync::Mutex::new(None),
        }
    }

    pub fn unpaced() -> Self {
        Self {
            limiter: None,
            base_period: Duration::ZERO,
            current_factor: AtomicU32::new(1),
            last_throttled: std::sync::Mutex::new(None),
        }
    }

    /// Wait until the next request toward the portal is allowed.
    pub async fn wait(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        self.try_restore();
        let current = limiter.load();
        current.until_ready().await;
    }

    /// Called when the portal signals overload.
    pub fn on_throttled(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        if let Ok(mut last) = self.last_throttled.lock() {
            *last = Some(Instant::now());
        }
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            });
        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor) {
            tracing::warn!(factor, period_ms = scaled.as_millis() as u64, "portal throttling, slowing down");
            limiter.store(Arc::new(limiter_for(scaled)));
        }
    }

    pub fn slowdown_factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }

    fn try_restore(&self) {
        if self.current_factor.load(Ordering::SeqCst) == 1 {
            return;
        }
        let quiet = self
            .last_throttled
            .lock()
            .ok()
            .and_then(|last| *last)
            .is_some_and(|t| t.elapsed() >= COOLDOWN);
        if quiet
            && let Some(limiter) = &self.limiter
        {
            self.current_factor.store(1, Ordering::SeqCst);
            limiter.store(Arc::new(limiter_for(self.base_period)));
            tracing::info!("portal pace restored");
        }
    }
}
