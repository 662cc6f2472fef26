//! Fixed-window request quotas per service.
//!
//! The counter update runs under the service's map entry lock, so
//! concurrent requests from one service are counted exactly.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::RateLimitingConfig;
use crate::error::AuthError;

/// Outcome of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Time until the window resets; set when the request was refused.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitingConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitingConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitingConfig {
        &self.config
    }

    /// Count one request and report whether it is within quota.
    pub fn check_rate_limit(&self, service_name: &str) -> bool {
        self.check_at(service_name, Instant::now()).allowed
    }

    /// Count one request, failing with [`AuthError::RateLimited`] when over quota.
    pub fn check(&self, service_name: &str) -> Result<RateLimitDecision, AuthError> {
        let decision = self.check_at(service_name, Instant::now());
        match decision.retry_after {
            Some(retry_after) if !decision.allowed => Err(AuthError::RateLimited {
                service: service_name.to_string(),
                retry_after,
            }),
            _ => Ok(decision),
        }
    }

    /// Count one request as of `now`.
    pub fn check_at(&self, service_name: &str, now: Instant) -> RateLimitDecision {
        let limit = self.config.limit_for(service_name);
        if !self.config.enabled {
            return RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit,
                retry_after: None,
            };
        }

        let window_len = self.config.window;
        let mut window = self
            .windows
            .entry(service_name.to_string())
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.saturating_duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }

        if window.count >= limit {
            let retry_after =
                window_len.saturating_sub(now.saturating_duration_since(window.started));
            debug!(
                service = %service_name,
                limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after: Some(retry_after),
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - window.count,
            retry_after: None,
        }
    }

    /// Forget a service's window.
    pub fn reset(&self, service_name: &str) {
        self.windows.remove(service_name);
    }

    /// Drop windows that ended before `now`. Returns the number removed.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let window_len = self.config.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window_len);
        before.saturating_sub(self.windows.len())
    }
}
