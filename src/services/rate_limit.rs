//! Sliding-window request throttling for the cart and checkout endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const CART_PER_MINUTE: usize = 50;
pub const CHECKOUT_PER_MINUTE: usize = 30;
pub const THROTTLED_MESSAGE: &str = "Too many requests, please try again later.";

#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, hits: Arc::default() }
    }

    pub fn per_minute(limit: usize) -> Self { Self::new(limit, Duration::from_secs(60)) }

    /// Records a hit for `key`; false once the key has used up its window.
    pub async fn allow(&self, key: &str) -> bool { self.allow_at(key, Instant::now()).await }

    async fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;
        let window = hits.entry(key.to_string()).or_default();
        while window.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            window.pop_front();
        }
        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drops keys with no hits inside the window.
    pub async fn purge(&self) {
        let now = Instant::now();
        let window = self.window;
        self.hits.lock().await.retain(|_, hits| hits.back().is_some_and(|t| now.duration_since(*t) < window));
    }
}

/// The limiters shared by the shop routes.
#[derive(Debug, Clone)]
pub struct ShopThrottle {
    pub cart: RateLimiter,
    pub checkout: RateLimiter,
}

impl Default for ShopThrottle {
    fn default() -> Self {
        Self { cart: RateLimiter::per_minute(CART_PER_MINUTE), checkout: RateLimiter::per_minute(CHECKOUT_PER_MINUTE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_per_key() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.allow("ip:1").await);
        assert!(limiter.allow("ip:1").await);
        assert!(!limiter.allow("ip:1").await);
        assert!(limiter.allow("ip:2").await);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.allow_at("k", start).await);
        assert!(!limiter.allow_at("k", start + Duration::from_secs(30)).await);
        assert!(limiter.allow_at("k", start + Duration::from_secs(61)).await);
    }

    #[tokio::test]
    async fn test_purge_drops_idle_keys() {
        let limiter = RateLimiter::per_minute(5);
        let now = Instant::now();
        let Some(stale) = now.checked_sub(Duration::from_secs(90)) else { return };
        assert!(limiter.allow_at("customer:1", stale).await);
        assert!(limiter.allow("customer:2").await);
        limiter.purge().await;
        let hits = limiter.hits.lock().await;
        assert!(!hits.contains_key("customer:1"));
        assert!(hits.contains_key("customer:2"));
    }
}
