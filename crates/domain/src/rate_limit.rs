//! Fixed-window request counter with a punitive block list.
//!
//! Counter and block entries live in the shared [`CacheStore`] so every API
//! replica sees the same state. The read-increment-write on a window is not
//! atomic: two concurrent requests from one identity may both observe
//! `count = k` and both persist `k + 1`. Limiting is best-effort and this
//! undercount is accepted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{decode_json, encode_json};
use crate::clock::Clock;
use crate::ports::cache::{CacheError, CacheStore};

const WINDOW_KEY_PREFIX: &str = "rate_limit";
const BLOCK_KEY_PREFIX: &str = "blocked";

/// Rate-limit bucket key. Derived from the client address, never persisted
/// beyond cache keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self("unknown".to_string());
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn window_key(&self) -> String {
        format!("{WINDOW_KEY_PREFIX}:{}", self.0)
    }

    fn block_key(&self) -> String {
        format!("{BLOCK_KEY_PREFIX}:{}", self.0)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_requests: 73,
            block_duration: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowState {
    pub window_start_ms: i64,
    pub count: u32,
}

impl WindowState {
    fn elapsed_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.window_start_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Admitted { count: u32 },
    /// The identity is serving a block, either pre-existing or created by
    /// this request.
    Blocked { newly_blocked: bool },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request for `identity` and decides whether it may proceed.
    ///
    /// An active block is never reset or extended here. Exceeding the limit
    /// inside a window creates a block for the full block duration.
    pub async fn check(&self, identity: &ClientIdentity) -> Result<RateDecision, CacheError> {
        if self.store.get(&identity.block_key()).await?.is_some() {
            return Ok(RateDecision::Blocked {
                newly_blocked: false,
            });
        }

        let window_key = identity.window_key();
        let now_ms = self.clock.now_ms();
        let window_ms = self.config.window.as_millis() as i64;

        let current = match self.store.get(&window_key).await? {
            Some(payload) => match decode_json::<WindowState>(&payload) {
                Ok(state) => Some(state),
                Err(err) => {
                    tracing::warn!(identity = %identity, error = %err, "discarding unreadable window state");
                    None
                }
            },
            None => None,
        };

        match current {
            Some(state) if state.elapsed_ms(now_ms) < window_ms => {
                let count = state.count.saturating_add(1);
                if count > self.config.max_requests {
                    self.store
                        .set_with_ttl(
                            &identity.block_key(),
                            b"1".to_vec(),
                            self.config.block_duration,
                        )
                        .await?;
                    tracing::warn!(
                        identity = %identity,
                        count,
                        block_secs = self.config.block_duration.as_secs(),
                        "rate limit exceeded; identity blocked"
                    );
                    return Ok(RateDecision::Blocked {
                        newly_blocked: true,
                    });
                }

                let remaining_ms = (window_ms - state.elapsed_ms(now_ms)).max(1) as u64;
                let next = WindowState {
                    window_start_ms: state.window_start_ms,
                    count,
                };
                self.store
                    .set_with_ttl(
                        &window_key,
                        encode_json(&next)?,
                        Duration::from_millis(remaining_ms),
                    )
                    .await?;
                Ok(RateDecision::Admitted { count })
            }
            _ => {
                let fresh = WindowState {
                    window_start_ms: now_ms,
                    count: 1,
                };
                self.store
                    .set_with_ttl(&window_key, encode_json(&fresh)?, self.config.window)
                    .await?;
                Ok(RateDecision::Admitted { count: 1 })
            }
        }
    }
}
