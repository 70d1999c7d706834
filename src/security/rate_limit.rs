//! Multi-level token bucket admission control.
//!
//! A request draws from three buckets in order: global, per-IP, per-user.
//! A rejection at a later scope refunds what the earlier scopes consumed,
//! so a rejected request leaves no trace on the buckets it passed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// A single token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let now = Instant::now();
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
            last_access: now,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
        self.last_access = now;
    }

    /// Refill, then take `n` tokens if available.
    pub fn consume(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Return `n` tokens taken by an earlier `consume`.
    pub fn refund(&mut self, n: f64) {
        self.tokens = (self.tokens + n).min(self.capacity);
    }

    /// Time until `n` tokens would be available.
    ///
    /// `Duration::MAX` when the bucket is short and never refills.
    pub fn get_wait_time(&self, n: f64) -> Duration {
        if self.tokens >= n {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((n - self.tokens) / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// Current token count, refill-adjusted.
    pub fn tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }
}

/// Which bucket made the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    Global,
    Ip,
    User,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Global => "global",
            LimitScope::Ip => "ip",
            LimitScope::User => "user",
        }
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed,
    Rejected { scope: LimitScope, retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

struct Buckets {
    global: TokenBucket,
    per_ip: HashMap<String, TokenBucket>,
    per_user: HashMap<String, TokenBucket>,
}

/// Global / IP / user rate limiter.
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let global = TokenBucket::new(config.global_capacity, config.global_refill_rate);
        Self {
            buckets: Mutex::new(Buckets {
                global,
                per_ip: HashMap::new(),
                per_user: HashMap::new(),
            }),
            config,
        }
    }

    /// Cascading admission check with compensation.
    ///
    /// Missing `ip` or `user` skips that scope.
    pub fn is_allowed(&self, ip: Option<&str>, user: Option<&str>, tokens: f64) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed;
        }

        let mut guard = self.buckets.lock();
        let buckets = &mut *guard;

        if !buckets.global.consume(tokens) {
            return self.reject(LimitScope::Global, buckets.global.get_wait_time(tokens), ip, user);
        }

        let ip_bucket = ip.map(|ip| {
            buckets
                .per_ip
                .entry(ip.to_string())
                .or_insert_with(|| TokenBucket::new(self.config.ip_capacity, self.config.ip_refill_rate))
        });
        let ip_consumed = match ip_bucket {
            Some(bucket) => {
                if !bucket.consume(tokens) {
                    let wait = bucket.get_wait_time(tokens);
                    buckets.global.refund(tokens);
                    return self.reject(LimitScope::Ip, wait, ip, user);
                }
                true
            }
            None => false,
        };

        if let Some(user) = user {
            let bucket = buckets
                .per_user
                .entry(user.to_string())
                .or_insert_with(|| TokenBucket::new(self.config.user_capacity, self.config.user_refill_rate));
            if !bucket.consume(tokens) {
                let wait = bucket.get_wait_time(tokens);
                buckets.global.refund(tokens);
                if ip_consumed {
                    if let Some(b) = ip.and_then(|ip| buckets.per_ip.get_mut(ip)) {
                        b.refund(tokens);
                    }
                }
                return self.reject(LimitScope::User, wait, ip, Some(user));
            }
        }

        Admission::Allowed
    }

    fn reject(&self, scope: LimitScope, retry_after: Duration, ip: Option<&str>, user: Option<&str>) -> Admission {
        tracing::warn!(
            scope = %scope,
            ip = ip.unwrap_or("-"),
            user = user.unwrap_or("-"),
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(scope.as_str());
        Admission::Rejected { scope, retry_after }
    }

    /// Drop IP and user buckets idle for at least `threshold`.
    ///
    /// Returns the number of buckets removed.
    pub fn cleanup_inactive(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.per_ip.len() + buckets.per_user.len();
        buckets.per_ip.retain(|_, b| b.idle_for(now) < threshold);
        buckets.per_user.retain(|_, b| b.idle_for(now) < threshold);
        let removed = before - (buckets.per_ip.len() + buckets.per_user.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle rate limit buckets");
        }
        removed
    }

    /// Cleanup using the configured inactivity threshold.
    pub fn cleanup(&self) -> usize {
        self.cleanup_inactive(Duration::from_secs(self.config.inactive_threshold_secs))
    }

    /// Tracked (ip, user) bucket counts.
    pub fn bucket_counts(&self) -> (usize, usize) {
        let buckets = self.buckets.lock();
        (buckets.per_ip.len(), buckets.per_user.len())
    }

    /// Refill-adjusted global token count.
    pub fn global_tokens(&self) -> f64 {
        self.buckets.lock().global.tokens()
    }

    /// Refill-adjusted token count of an IP bucket, if tracked.
    pub fn ip_tokens(&self, ip: &str) -> Option<f64> {
        self.buckets.lock().per_ip.get_mut(ip).map(|b| b.tokens())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
