//! Cache entry: value plus the metadata used to compute staleness, expiry, and GC
//! eligibility.
//!
//! Same shape of created/last-accessed timestamps and an access counter as an adaptive-TTL
//! cache entry, generalized here to the freshness/TTL/refcount model the store actually
//! needs instead of an adaptive-TTL heuristic.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored value plus its cache metadata.
///
/// `hasValue` distinguishes "the fetcher resolved to an absent value" from "nothing has
/// been cached yet" — both are representable, since `T` itself may not have a sentinel for
/// "no value".
#[derive(Debug, Clone)]
pub struct Entry<T> {
    data: T,
    has_value: bool,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: u64,
    stale_time: Duration,
    cache_time: Duration,
    reference_count: u32,
    is_secure: bool,
    expires_at: Option<DateTime<Utc>>,
    version: u64,
    size_bytes: u64,
}

impl<T> Entry<T> {
    /// Build a new entry as of `now`, version 0, with zero access count and refcount.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data: T,
        has_value: bool,
        now: DateTime<Utc>,
        stale_time: Duration,
        cache_time: Duration,
        is_secure: bool,
        expires_at: Option<DateTime<Utc>>,
        size_bytes: u64,
    ) -> Self {
        Self {
            data,
            has_value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            stale_time,
            cache_time,
            reference_count: 0,
            is_secure,
            expires_at,
            version: 0,
            size_bytes,
        }
    }

    /// Record a `get` at `now`: bumps `lastAccessedAt` and `accessCount`.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Replace this entry's value and metadata in place, bumping its version. Used by
    /// `Store::set` when overwriting an existing key.
    #[allow(clippy::too_many_arguments)]
    pub fn replace(
        &mut self,
        data: T,
        has_value: bool,
        now: DateTime<Utc>,
        stale_time: Duration,
        cache_time: Duration,
        is_secure: bool,
        expires_at: Option<DateTime<Utc>>,
        size_bytes: u64,
    ) {
        self.data = data;
        self.has_value = has_value;
        self.created_at = now;
        self.last_accessed_at = now;
        self.access_count = 0;
        self.stale_time = stale_time;
        self.cache_time = cache_time;
        self.is_secure = is_secure;
        self.expires_at = expires_at;
        self.size_bytes = size_bytes;
        self.version += 1;
    }

    /// Age of this entry relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// `true` while the entry's age is less than its `staleTime`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now) < self.stale_time
    }

    /// `true` for secure entries past their mandatory `expiresAt`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_secure
            && self
                .expires_at
                .is_some_and(|expires_at| now > expires_at)
    }

    /// `true` once this entry has no subscribers and is either expired or has outlived its
    /// `cacheTime` since last access.
    #[must_use]
    pub fn should_gc(&self, now: DateTime<Utc>) -> bool {
        if self.reference_count != 0 {
            return false;
        }
        if self.is_expired(now) {
            return true;
        }
        let idle = (now - self.last_accessed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        idle > self.cache_time
    }

    /// Increment the reference count (a new `Query` subscriber attached).
    pub fn acquire(&mut self) {
        self.reference_count += 1;
    }

    /// Decrement the reference count, saturating at zero.
    pub fn release(&mut self) {
        self.reference_count = self.reference_count.saturating_sub(1);
    }

    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.has_value
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    #[must_use]
    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
