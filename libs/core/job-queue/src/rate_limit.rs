//! Fixed-window admission control keyed by caller identity.
//!
//! Every check increments two counters, one for the current minute bucket and
//! one for the current hour bucket:
//!
//! ```text
//! rate_limit:minute:{caller}:{unix / 60}
//! rate_limit:hour:{caller}:{unix / 3600}
//! ```
//!
//! A counter gets its expiry on the increment that creates it, so stale
//! buckets disappear on their own. When the store cannot be reached the check
//! fails open.

use crate::clock::{Clock, SystemClock};
use crate::error::QueueResult;
use crate::metrics;
use crate::store::CoordinationStore;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, IntoStaticStr};
use tracing::{debug, warn};

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Per-caller quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 1000,
            per_hour: 10_000,
        }
    }
}

impl RateLimitConfig {
    fn limit(&self, window: Window) -> u64 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
        }
    }
}

/// Window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Minute,
    Hour,
}

impl Window {
    pub fn length_secs(self) -> i64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3600,
        }
    }

    fn ttl(self) -> Duration {
        Duration::from_secs(self.length_secs().unsigned_abs())
    }

    /// Bucket index for a unix timestamp.
    pub fn index(self, unix: i64) -> i64 {
        unix.div_euclid(self.length_secs())
    }

    /// Start of the bucket after the one containing `unix`.
    pub fn next_reset(self, unix: i64) -> DateTime<Utc> {
        let secs = (self.index(unix) + 1) * self.length_secs();
        DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn key(self, caller: &str, index: i64) -> String {
        format!("rate_limit:{}:{}:{}", self, caller, index)
    }

    fn label(self) -> &'static str {
        self.into()
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Window that rejected the request, or the tightest window when allowed.
    pub window: Window,
    pub limit: u64,
    pub remaining: u64,
    /// Start of the next bucket of `window`.
    pub reset_at: DateTime<Utc>,
}

/// Current usage of one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub minute: WindowUsage,
    pub hour: WindowUsage,
}

/// Identity of the caller being rate limited, inserted as a request extension
/// by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RateLimitConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CoordinationStore>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count one request against the minute then the hour window.
    ///
    /// The hour counter is not touched when the minute window rejects.
    pub async fn check(&self, caller: &str) -> RateLimitDecision {
        let unix = self.clock.now().timestamp();
        let mut tightest: Option<RateLimitDecision> = None;

        for window in [Window::Minute, Window::Hour] {
            let limit = self.config.limit(window);
            let key = window.key(caller, window.index(unix));

            let count = match self.store.incr_with_expiry(&key, window.ttl()).await {
                Ok(count) => count.max(0).unsigned_abs(),
                Err(e) => {
                    warn!(
                        caller = %caller,
                        window = %window,
                        error = %e,
                        "Rate limit check failed, allowing request"
                    );
                    metrics::rate_limit_fail_open();
                    return tightest.unwrap_or_else(|| self.unchecked(window, unix));
                }
            };

            let decision = RateLimitDecision {
                allowed: count <= limit,
                window,
                limit,
                remaining: limit.saturating_sub(count),
                reset_at: window.next_reset(unix),
            };
            metrics::rate_limit_decision(window.label(), decision.allowed);

            if !decision.allowed {
                debug!(caller = %caller, window = %window, count, limit, "Rate limit exceeded");
                return decision;
            }

            let tighter = tightest
                .as_ref()
                .is_none_or(|current| decision.remaining < current.remaining);
            if tighter {
                tightest = Some(decision);
            }
        }

        tightest.unwrap_or_else(|| self.unchecked(Window::Minute, unix))
    }

    fn unchecked(&self, window: Window, unix: i64) -> RateLimitDecision {
        let limit = self.config.limit(window);
        RateLimitDecision {
            allowed: true,
            window,
            limit,
            remaining: limit,
            reset_at: window.next_reset(unix),
        }
    }

    /// Usage of the current buckets without counting a request. Missing
    /// counters read as zero.
    pub async fn status(&self, caller: &str) -> QueueResult<RateLimitStatus> {
        let unix = self.clock.now().timestamp();
        Ok(RateLimitStatus {
            minute: self.usage(caller, Window::Minute, unix).await?,
            hour: self.usage(caller, Window::Hour, unix).await?,
        })
    }

    async fn usage(&self, caller: &str, window: Window, unix: i64) -> QueueResult<WindowUsage> {
        let key = window.key(caller, window.index(unix));
        let used = self
            .store
            .get(&key)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let limit = self.config.limit(window);

        Ok(WindowUsage {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            reset_at: window.next_reset(unix),
        })
    }

    /// Delete the current and previous buckets of both windows.
    /// Returns how many deletes succeeded.
    pub async fn reset(&self, caller: &str) -> usize {
        let unix = self.clock.now().timestamp();
        let mut deleted = 0;

        for window in [Window::Minute, Window::Hour] {
            let current = window.index(unix);
            for index in [current, current - 1] {
                let key = window.key(caller, index);
                match self.store.del(&key).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(key = %key, error = %e, "Failed to delete rate limit counter"),
                }
            }
        }

        deleted
    }

    fn retry_after_secs(&self, reset_at: DateTime<Utc>) -> u64 {
        (reset_at - self.clock.now()).num_seconds().max(0).unsigned_abs()
    }
}

/// Axum middleware enforcing the limiter for requests that carry a [`CallerId`].
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/api/traces", post(create_trace))
///     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
/// ```
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let Some(CallerId(caller)) = request.extensions().get::<CallerId>().cloned() else {
        return next.run(request).await;
    };

    let decision = limiter.check(&caller).await;
    let reset_epoch = decision.reset_at.timestamp();

    if !decision.allowed {
        let retry_after = limiter.retry_after_secs(decision.reset_at);
        let body = json!({
            "error": "Rate limit exceeded",
            "message": "Too many requests. Please try again later.",
            "code": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
        headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u64));
        headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(reset_epoch));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(reset_epoch));
    response
}
