use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::timed;
use crate::{
    DEFAULT_STORE_TIMEOUT, EndpointCategory, QuotaError, QuotaKeySpace, QuotaStore,
    StoreOperation, validate_user_id,
};

/// Counter values after a recorded request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordedUsage {
    /// The category counter.
    pub category: u64,
    /// The aggregate counter.
    pub total: u64,
}

/// Records usage without deciding anything.
///
/// This is meant for pipelines that observe traffic after it has been served, for example to keep
/// counters of an upstream that enforces its own limits.
///
/// # Not a gate
///
/// Calling [`QuotaEnforcer::check_only`](crate::QuotaEnforcer::check_only) and then
/// [`record`](Self::record) is a check-then-act race. With `N` concurrent requests, up to `N - 1`
/// of them can pass the check after the budget is already spent. Use
/// [`QuotaEnforcer::check_and_increment`](crate::QuotaEnforcer::check_and_increment) to gate
/// requests.
#[derive(Clone, Debug)]
pub struct UsageRecorder<S> {
    store: S,
    key_space: QuotaKeySpace,
    timeout: Duration,
}

impl<S: QuotaStore> UsageRecorder<S> {
    /// Creates a recorder over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            key_space: QuotaKeySpace::default(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the key space used to name counters.
    pub fn key_space(mut self, key_space: QuotaKeySpace) -> Self {
        self.key_space = key_space;
        self
    }

    /// Sets the deadline of a store round trip.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Counts one request in `category` and in the aggregate.
    pub async fn record(
        &self,
        user_id: &str,
        category: EndpointCategory,
    ) -> Result<RecordedUsage, QuotaError> {
        self.record_at(user_id, category, Utc::now()).await
    }

    /// Counts one request at the given time.
    pub async fn record_at(
        &self,
        user_id: &str,
        category: EndpointCategory,
        now: DateTime<Utc>,
    ) -> Result<RecordedUsage, QuotaError> {
        if category.is_aggregate() {
            return Err(QuotaError::AggregateCategory);
        }
        validate_user_id(user_id)?;

        let (category_key, ttl_seconds) = self.key_space.key_for(user_id, category, now);
        let (total_key, _) = self
            .key_space
            .key_for(user_id, EndpointCategory::Total, now);

        let counts = timed(
            StoreOperation::Increment,
            self.timeout,
            self.store
                .increment_with_expiry(&[category_key, total_key], ttl_seconds),
        )
        .await?;

        match counts.as_slice() {
            [category, total] => Ok(RecordedUsage {
                category: *category,
                total: *total,
            }),
            _ => Err(QuotaError::Store(crate::StoreError::unavailable(
                "unexpected number of counters",
            ))),
        }
    }
}
