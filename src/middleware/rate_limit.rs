//! Fixed-window request limiting.
//!
//! Counters are keyed by policy, client and path. The backing store is
//! injected: Redis when `REDIS_URL` is set, otherwise an in-process map that
//! the sweeper evicts on every pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::MultiplexedConnection;
use tracing::{debug, error, warn};

use crate::config::RateLimitConfig;
use crate::error::ApiError;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn lookup(config: &RateLimitConfig) -> Self {
        Self {
            name: "lookup",
            max_requests: config.lookup_max,
            window: Duration::from_secs(config.window_seconds),
        }
    }

    pub fn standard(config: &RateLimitConfig) -> Self {
        Self {
            name: "default",
            max_requests: config.default_max,
            window: Duration::from_secs(config.window_seconds),
        }
    }
}

/// Counter state right after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    pub reset_in: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one request against `key` and returns the window state.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, RateLimitError>;

    /// Drops windows that have ended. Stores with native key expiry return 0.
    async fn evict_expired(&self) -> usize {
        0
    }
}

/* ---------- IN-MEMORY ---------- */

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    resets_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_at(&self, key: &str, window: Duration, now: Instant) -> WindowState {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now >= w.resets_at {
                    *w = Window { count: 0, resets_at: now + window };
                }
            })
            .or_insert(Window { count: 0, resets_at: now + window });
        entry.count += 1;
        WindowState {
            count: entry.count,
            reset_in: entry.resets_at.saturating_duration_since(now),
        }
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now < w.resets_at);
        before - windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, RateLimitError> {
        Ok(self.hit_at(key, window, Instant::now()))
    }

    async fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }
}

/* ---------- REDIS ---------- */

const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: MultiplexedConnection,
    script: Arc<redis::Script>,
}

impl RedisRateLimitStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            script: Arc::new(redis::Script::new(HIT_SCRIPT)),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, RateLimitError> {
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowState {
            count: count.max(0) as u64,
            reset_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }
}

/* ---------- LIMITER ---------- */

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Same store, different policy.
    pub fn with_policy(&self, policy: RateLimitPolicy) -> Self {
        Self {
            store: self.store.clone(),
            policy,
        }
    }

    pub fn store(&self) -> Arc<dyn RateLimitStore> {
        self.store.clone()
    }

    /// `None` when the store failed and the request should be let through.
    pub async fn check(&self, client: &str, path: &str) -> Option<Decision> {
        let key = format!("ratelimit:{}:{}:{}", self.policy.name, client, path);
        let state = match self.store.hit(&key, self.policy.window).await {
            Ok(state) => state,
            Err(e) => {
                error!("Rate limit store failed for {}: {}", key, e);
                return None;
            }
        };

        let decision = Decision {
            allowed: state.count <= self.policy.max_requests,
            limit: self.policy.max_requests,
            remaining: self.policy.max_requests.saturating_sub(state.count),
            reset_secs: state.reset_in.as_millis().div_ceil(1000) as u64,
        };
        if decision.allowed {
            debug!("Rate limit check passed for {}: {}/{}", key, state.count, decision.limit);
        } else {
            warn!("Rate limit exceeded for {}: {}/{}", key, state.count, decision.limit);
        }
        Some(decision)
    }
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`.
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded.or(real_ip).unwrap_or("unknown").to_string()
}

fn set_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_secs));
}

/// Use with `axum::middleware::from_fn_with_state`.
pub async fn enforce(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let client = client_key(request.headers());
    let path = request.uri().path().to_string();

    let Some(decision) = limiter.check(&client, &path).await else {
        return next.run(request).await;
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        ApiError::rate_limited(decision.reset_secs).into_response()
    };
    set_headers(response.headers_mut(), &decision);
    response
}
