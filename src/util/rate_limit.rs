//! Rate limiting utilities

use axum::http::HeaderMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed rate limiter type alias
pub type KeyedLimiter = DefaultKeyedRateLimiter<String>;

/// Tracked clients above which idle entries are evicted
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Create a keyed rate limiter with the specified requests per minute
pub fn create_keyed_limiter(requests_per_minute: u32) -> Arc<KeyedLimiter> {
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::keyed(quota))
}

/// Per-client limiter for public form submissions
#[derive(Clone)]
pub struct FormRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl FormRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            limiter: create_keyed_limiter(per_minute),
        }
    }

    /// Check if a submission from `client` is allowed (returns true if allowed)
    pub fn check(&self, client: &str) -> bool {
        if self.limiter.len() > MAX_TRACKED_CLIENTS {
            // Only clients whose quota has fully replenished are dropped
            self.limiter.retain_recent();
            self.limiter.shrink_to_fit();
        }

        self.limiter.check_key(&client.to_string()).is_ok()
    }
}

/// Best guess at the client address behind the hosting proxy
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn limits_each_client_separately() {
        let limiter = FormRateLimiter::new(2);
        assert!(limiter.check("1.1.1.1"));
        assert!(limiter.check("1.1.1.1"));
        assert!(!limiter.check("1.1.1.1"));
        assert!(limiter.check("2.2.2.2"));
    }

    #[test]
    fn zero_quota_still_allows_one() {
        let limiter = FormRateLimiter::new(0);
        assert!(limiter.check("x"));
        assert!(!limiter.check("x"));
    }

    #[test]
    fn eviction_keeps_clients_mid_window() {
        let limiter = FormRateLimiter::new(1);
        assert!(limiter.check("busy"));
        for i in 0..=MAX_TRACKED_CLIENTS {
            limiter.check(&format!("10.0.{}.{}", i / 256, i % 256));
        }
        assert!(limiter.limiter.len() > MAX_TRACKED_CLIENTS);
        // The busy client's spent quota survives eviction
        assert!(!limiter.check("busy"));
    }

    #[test]
    fn client_key_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_key(&headers), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_key(&headers), "203.0.113.7");
    }
}
