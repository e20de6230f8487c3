//! Sender rotation
//!
//! A single shared counter selects which sender account handles the next
//! delivery attempt. The counter cycles through `1..=pool_size` and is
//! advanced on every attempt, by every request, so concurrent callers must
//! never observe the same pre-increment value.
//!
//! Two backends are provided:
//! - [`RedisRotator`]: counter lives in Redis and is advanced by a Lua script,
//!   so the read-modify-write is atomic across every relay instance
//! - [`MemoryRotator`]: process-local atomic counter with identical semantics

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use deadpool_redis::Pool as RedisPool;
use redis::Script;

use crate::error::RotationError;

/// Advances the counter stored at `KEYS[1]` through `1..=ARGV[1]`.
///
/// An absent key starts at 1. A value at or past the pool size (or below 1,
/// after the pool was resized) wraps to 1.
const ADVANCE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
local pool_size = tonumber(ARGV[1])
local next_id
if not current then
    next_id = 1
else
    current = tonumber(current)
    if not current then
        return redis.error_reply('sender counter is not numeric')
    end
    if current >= pool_size or current < 1 then
        next_id = 1
    else
        next_id = current + 1
    end
end
redis.call('SET', KEYS[1], next_id)
return next_id
";

/// Identifier of one sender account, always within `1..=pool_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SenderId(u32);

impl SenderId {
    /// The first sender in every pool
    #[must_use]
    pub const fn first() -> Self {
        Self(1)
    }

    /// Validate a raw counter value against the pool size
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::OutOfRange`] if `value` is not in `1..=pool_size`
    pub fn new(value: i64, pool_size: u32) -> Result<Self, RotationError> {
        match u32::try_from(value) {
            Ok(id) if (1..=pool_size).contains(&id) => Ok(Self(id)),
            _ => Err(RotationError::OutOfRange { value, pool_size }),
        }
    }

    /// Raw numeric id, as stored in the credential table
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The id following `current` in a pool of `pool_size` senders
    ///
    /// `None` (counter not created yet) yields the first sender.
    #[must_use]
    pub const fn after(current: Option<u32>, pool_size: u32) -> Self {
        match current {
            Some(id) if id >= 1 && id < pool_size => Self(id + 1),
            _ => Self::first(),
        }
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of the next sender id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SenderRotator: Send + Sync {
    /// Atomically advance the shared counter and return the new value
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] if the backing store is unreachable or holds
    /// a corrupt value
    async fn next_sender_id(&self) -> Result<SenderId, RotationError>;
}

/// Redis-backed rotator shared by every relay instance
pub struct RedisRotator {
    pool: RedisPool,
    key: String,
    pool_size: u32,
    script: Script,
}

impl RedisRotator {
    /// Create a rotator over the counter stored at `key`
    #[must_use]
    pub fn new(pool: RedisPool, key: impl Into<String>, pool_size: u32) -> Self {
        Self {
            pool,
            key: key.into(),
            pool_size,
            script: Script::new(ADVANCE_SCRIPT),
        }
    }
}

#[async_trait]
impl SenderRotator for RedisRotator {
    async fn next_sender_id(&self) -> Result<SenderId, RotationError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RotationError::Pool(e.to_string()))?;

        let value: i64 = self
            .script
            .key(&self.key)
            .arg(self.pool_size)
            .invoke_async(&mut *conn)
            .await?;

        let id = SenderId::new(value, self.pool_size)?;
        tracing::trace!(key = %self.key, sender_id = %id, "Advanced sender counter");
        Ok(id)
    }
}

/// Process-local rotator
///
/// Used when a single relay instance owns the pool, and in tests.
#[derive(Debug)]
pub struct MemoryRotator {
    // 0 means the counter has not been created yet
    counter: AtomicU32,
    pool_size: u32,
}

impl MemoryRotator {
    /// Create a fresh rotator; the first call returns sender 1
    #[must_use]
    pub const fn new(pool_size: u32) -> Self {
        Self {
            counter: AtomicU32::new(0),
            pool_size,
        }
    }

    /// Create a rotator whose counter already holds `current`
    #[must_use]
    pub const fn starting_after(current: SenderId, pool_size: u32) -> Self {
        Self {
            counter: AtomicU32::new(current.get()),
            pool_size,
        }
    }

    /// Value currently stored, `None` before the first advance
    #[must_use]
    pub fn current(&self) -> Option<SenderId> {
        match self.counter.load(Ordering::Acquire) {
            0 => None,
            id => Some(SenderId(id)),
        }
    }

    fn advance(&self) -> SenderId {
        let pool_size = self.pool_size;
        let step = |current: u32| {
            let current = (current != 0).then_some(current);
            Some(SenderId::after(current, pool_size).get())
        };
        let (Ok(previous) | Err(previous)) =
            self.counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, step);
        SenderId::after((previous != 0).then_some(previous), pool_size)
    }
}

#[async_trait]
impl SenderRotator for MemoryRotator {
    async fn next_sender_id(&self) -> Result<SenderId, RotationError> {
        Ok(self.advance())
    }
}
