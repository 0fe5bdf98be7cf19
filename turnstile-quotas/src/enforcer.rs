use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::Serialize;

use crate::statsd::QuotaCounters;
use crate::store::timed;
use crate::{
    EndpointCategory, QuotaAdmin, QuotaKeySpace, QuotaStore, StoreError, StoreOperation, Tier,
    TierLimitTable, UsageRecorder, reset_seconds, validate_user_id,
};

/// The default deadline for a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Header carrying the category ceiling.
pub const QUOTA_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-quota-limit");
/// Header carrying the requests left in the category today.
pub const QUOTA_REMAINING_HEADER: HeaderName = HeaderName::from_static("x-quota-remaining");
/// Header carrying the seconds until the counters reset.
pub const QUOTA_RESET_HEADER: HeaderName = HeaderName::from_static("x-quota-reset");
/// Header carrying the category that was checked.
pub const QUOTA_CATEGORY_HEADER: HeaderName = HeaderName::from_static("x-quota-category");

/// Errors of the quota engine.
///
/// Unavailability of the store is not an error for enforcement, which fails open instead. Only
/// administrative and telemetry operations return [`QuotaError::Store`].
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The aggregate category was passed where a concrete category is required.
    #[error("the `total` category is an aggregate and cannot be checked directly")]
    AggregateCategory,

    /// The user id is empty or cannot be embedded in a counter key.
    #[error("invalid user id `{0}`")]
    InvalidUserId(String),

    /// The store could not complete an administrative operation.
    #[error("quota store operation failed")]
    Store(#[from] StoreError),
}

/// The outcome of a quota check.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct QuotaDecision {
    /// The category that was checked.
    pub category: EndpointCategory,
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the category today.
    pub remaining: u64,
    /// The daily ceiling of the category.
    pub limit: u64,
    /// Seconds until the counters reset at UTC midnight.
    pub reset_seconds: u64,
    /// `true` if the store could not be consulted and the request was admitted regardless.
    pub fail_open: bool,
}

impl QuotaDecision {
    fn zero_limit(category: EndpointCategory, reset_seconds: u64) -> Self {
        Self {
            category,
            allowed: false,
            remaining: 0,
            limit: 0,
            reset_seconds,
            fail_open: false,
        }
    }

    fn fail_open(category: EndpointCategory, limit: u64, reset_seconds: u64) -> Self {
        Self {
            category,
            allowed: true,
            remaining: limit,
            limit,
            reset_seconds,
            fail_open: true,
        }
    }

    /// Renders the `X-Quota-*` response headers.
    ///
    /// Denials additionally carry a `Retry-After` header.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(5);
        headers.insert(QUOTA_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(QUOTA_REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(QUOTA_RESET_HEADER, HeaderValue::from(self.reset_seconds));
        headers.insert(
            QUOTA_CATEGORY_HEADER,
            HeaderValue::from_static(self.category.name()),
        );
        if let Some(retry_after) = self.retry_after() {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }
        headers
    }

    /// Returns the seconds after which a denied request may be retried.
    pub fn retry_after(&self) -> Option<u64> {
        (!self.allowed).then_some(self.reset_seconds)
    }

    /// Converts a denial into an error.
    pub fn into_result(self) -> Result<Self, QuotaExceeded> {
        if self.allowed {
            Ok(self)
        } else {
            Err(QuotaExceeded(self))
        }
    }
}

/// A denied [`QuotaDecision`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("daily quota exceeded for category {}", .0.category)]
pub struct QuotaExceeded(pub QuotaDecision);

impl QuotaExceeded {
    /// Returns the denied decision.
    pub fn decision(&self) -> &QuotaDecision {
        &self.0
    }
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Allowed,
    Denied,
    ZeroLimit,
    FailOpen,
}

impl Outcome {
    fn name(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::ZeroLimit => "zero_limit",
            Self::FailOpen => "fail_open",
        }
    }
}

/// Decides whether requests fit into a user's daily quota.
///
/// The enforcer is cheap to clone and does not keep any counter state itself. All counting happens
/// in the injected [`QuotaStore`].
#[derive(Clone, Debug)]
pub struct QuotaEnforcer<S> {
    store: S,
    table: Arc<TierLimitTable>,
    key_space: QuotaKeySpace,
    timeout: Duration,
}

impl<S: QuotaStore> QuotaEnforcer<S> {
    /// Creates an enforcer over the given store and ceilings.
    pub fn new(store: S, table: TierLimitTable) -> Self {
        Self {
            store,
            table: Arc::new(table),
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
    ///
    /// Once it elapses, the request is admitted without consulting the store.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured ceilings.
    pub fn table(&self) -> &TierLimitTable {
        &self.table
    }

    /// Returns an admin interface sharing this enforcer's store and settings.
    pub fn admin(&self) -> QuotaAdmin<S> {
        QuotaAdmin::from_parts(
            self.store.clone(),
            Arc::clone(&self.table),
            self.key_space.clone(),
            self.timeout,
        )
    }

    /// Returns a usage recorder sharing this enforcer's store and settings.
    pub fn recorder(&self) -> UsageRecorder<S> {
        UsageRecorder::new(self.store.clone())
            .key_space(self.key_space.clone())
            .timeout(self.timeout)
    }

    /// Counts a request against the user's quota and decides whether it is admitted.
    ///
    /// See [`check_and_increment_at`](Self::check_and_increment_at).
    pub async fn check_and_increment(
        &self,
        user_id: &str,
        tier: Tier,
        category: EndpointCategory,
    ) -> Result<QuotaDecision, QuotaError> {
        self.check_and_increment_at(user_id, tier, category, Utc::now())
            .await
    }

    /// Counts a request against the user's quota at the given time.
    ///
    /// The category counter and the aggregate counter are incremented together in one atomic store
    /// operation. The request is admitted if both counters are within their ceilings. Denied
    /// requests still count against both counters.
    ///
    /// A category with a ceiling of zero is denied without contacting the store. If the store
    /// fails or does not answer within the timeout, the request is admitted with the full ceiling
    /// as remaining budget and [`QuotaDecision::fail_open`] set.
    pub async fn check_and_increment_at(
        &self,
        user_id: &str,
        tier: Tier,
        category: EndpointCategory,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        if category.is_aggregate() {
            return Err(QuotaError::AggregateCategory);
        }
        validate_user_id(user_id)?;

        let limits = self.table.limits_for(tier);
        let category_limit = limits.get(category).requests_per_window;
        let total_limit = limits.total().requests_per_window;
        let reset_seconds = reset_seconds(now);

        if category_limit == 0 {
            record_outcome(tier, category, Outcome::ZeroLimit);
            return Ok(QuotaDecision::zero_limit(category, reset_seconds));
        }

        let (category_key, ttl_seconds) = self.key_space.key_for(user_id, category, now);
        let (total_key, _) = self
            .key_space
            .key_for(user_id, EndpointCategory::Total, now);

        let result = timed(
            StoreOperation::Increment,
            self.timeout,
            self.store
                .increment_with_expiry(&[category_key, total_key], ttl_seconds),
        )
        .await;

        let (category_count, total_count) = match result.and_then(expect_pair) {
            Ok(counts) => counts,
            Err(error) => {
                record_outcome(tier, category, Outcome::FailOpen);
                return Ok(self.fail_open(user_id, category, category_limit, error, now));
            }
        };

        let allowed = category_count <= category_limit && total_count <= total_limit;
        let outcome = if allowed {
            Outcome::Allowed
        } else {
            Outcome::Denied
        };
        record_outcome(tier, category, outcome);

        if !allowed {
            turnstile_log::debug!(
                user_id,
                tier = tier.name(),
                category = category.name(),
                category_count,
                total_count,
                "daily quota exceeded",
            );
        }

        Ok(QuotaDecision {
            category,
            allowed,
            remaining: category_limit.saturating_sub(category_count),
            limit: category_limit,
            reset_seconds,
            fail_open: false,
        })
    }

    /// Reports whether another request would currently be admitted, without counting it.
    ///
    /// See [`check_only_at`](Self::check_only_at).
    pub async fn check_only(
        &self,
        user_id: &str,
        tier: Tier,
        category: EndpointCategory,
    ) -> Result<QuotaDecision, QuotaError> {
        self.check_only_at(user_id, tier, category, Utc::now()).await
    }

    /// Reports whether another request would be admitted at the given time, without counting it.
    ///
    /// This reads the counters and never increments them. The answer is stale as soon as it is
    /// returned, so it must not be used to gate requests; use
    /// [`check_and_increment`](Self::check_and_increment) for that.
    pub async fn check_only_at(
        &self,
        user_id: &str,
        tier: Tier,
        category: EndpointCategory,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        if category.is_aggregate() {
            return Err(QuotaError::AggregateCategory);
        }
        validate_user_id(user_id)?;

        let limits = self.table.limits_for(tier);
        let category_limit = limits.get(category).requests_per_window;
        let total_limit = limits.total().requests_per_window;
        let reset_seconds = reset_seconds(now);

        if category_limit == 0 {
            return Ok(QuotaDecision::zero_limit(category, reset_seconds));
        }

        let (category_key, _) = self.key_space.key_for(user_id, category, now);
        let (total_key, _) = self
            .key_space
            .key_for(user_id, EndpointCategory::Total, now);

        let result = timed(
            StoreOperation::MultiGet,
            self.timeout,
            self.store.multi_get(&[category_key, total_key]),
        )
        .await;

        let (category_count, total_count) = match result.and_then(expect_pair) {
            Ok(counts) => counts,
            Err(error) => {
                return Ok(self.fail_open(user_id, category, category_limit, error, now));
            }
        };

        Ok(QuotaDecision {
            category,
            allowed: category_count < category_limit && total_count < total_limit,
            remaining: category_limit.saturating_sub(category_count),
            limit: category_limit,
            reset_seconds,
            fail_open: false,
        })
    }

    fn fail_open(
        &self,
        user_id: &str,
        category: EndpointCategory,
        limit: u64,
        error: StoreError,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        turnstile_log::warn!(
            error = &error as &dyn std::error::Error,
            user_id,
            category = category.name(),
            "quota store failed, admitting request",
        );
        turnstile_statsd::metric!(counter(QuotaCounters::FailOpen) += 1, kind = error.kind());

        QuotaDecision::fail_open(category, limit, reset_seconds(now))
    }
}

fn expect_pair(counts: Vec<u64>) -> Result<(u64, u64), StoreError> {
    match counts.as_slice() {
        [category, total] => Ok((*category, *total)),
        other => Err(StoreError::unavailable(format!(
            "expected 2 counters from the store, got {}",
            other.len()
        ))),
    }
}

fn record_outcome(tier: Tier, category: EndpointCategory, outcome: Outcome) {
    turnstile_statsd::metric!(
        counter(QuotaCounters::Decision) += 1,
        category = category.name(),
        tier = tier.name(),
        outcome = outcome.name(),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{MemoryQuotaStore, QuotaKey, QuotaLimit, TierLimits};

    /// Counts store round trips.
    #[derive(Clone, Debug, Default)]
    struct CountingStore {
        inner: MemoryQuotaStore,
        calls: Arc<AtomicUsize>,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QuotaStore for CountingStore {
        async fn increment_with_expiry(
            &self,
            keys: &[QuotaKey],
            ttl_seconds: u64,
        ) -> Result<Vec<u64>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.increment_with_expiry(keys, ttl_seconds).await
        }

        async fn multi_get(&self, keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.multi_get(keys).await
        }

        async fn delete(&self, keys: &[QuotaKey]) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(keys).await
        }
    }

    /// A store that can be switched off.
    #[derive(Clone, Debug)]
    struct FlakyStore {
        inner: MemoryQuotaStore,
        available: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryQuotaStore::new(),
                available: Arc::new(AtomicBool::new(true)),
            }
        }

        fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.available.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StoreError::unavailable("connection refused"))
            }
        }
    }

    impl QuotaStore for FlakyStore {
        async fn increment_with_expiry(
            &self,
            keys: &[QuotaKey],
            ttl_seconds: u64,
        ) -> Result<Vec<u64>, StoreError> {
            self.check()?;
            self.inner.increment_with_expiry(keys, ttl_seconds).await
        }

        async fn multi_get(&self, keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
            self.check()?;
            self.inner.multi_get(keys).await
        }

        async fn delete(&self, keys: &[QuotaKey]) -> Result<u64, StoreError> {
            self.check()?;
            self.inner.delete(keys).await
        }
    }

    /// A store that never answers in time.
    #[derive(Clone, Debug)]
    struct StalledStore;

    impl QuotaStore for StalledStore {
        async fn increment_with_expiry(
            &self,
            _keys: &[QuotaKey],
            _ttl_seconds: u64,
        ) -> Result<Vec<u64>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![1, 1])
        }

        async fn multi_get(&self, _keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![0, 0])
        }

        async fn delete(&self, _keys: &[QuotaKey]) -> Result<u64, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }
    }

    fn noon() -> DateTime<Utc> {
        "2024-05-10T12:00:00Z".parse().unwrap()
    }

    fn enforcer<S: QuotaStore>(store: S) -> QuotaEnforcer<S> {
        QuotaEnforcer::new(store, TierLimitTable::default()).timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_free_analytics_sequence() {
        let enforcer = enforcer(MemoryQuotaStore::new());

        for i in 1..=100 {
            let decision = enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
                .await
                .unwrap();

            assert!(decision.allowed, "call {i} should be allowed");
            assert_eq!(decision.remaining, 100 - i);
            assert_eq!(decision.limit, 100);
            assert!(!decision.fail_open);
        }

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_seconds, 12 * 3600);
    }

    #[tokio::test]
    async fn test_denied_requests_consume_budget() {
        let store = MemoryQuotaStore::new();
        let enforcer = enforcer(store.clone());

        for _ in 0..102 {
            enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
                .await
                .unwrap();
        }

        let usage = enforcer
            .admin()
            .usage_snapshot_at("u1", Tier::Free, noon())
            .await
            .unwrap();
        assert_eq!(usage.get(EndpointCategory::Analytics).unwrap().used, 102);
        assert_eq!(usage.get(EndpointCategory::Total).unwrap().used, 102);
    }

    #[tokio::test]
    async fn test_zero_limit_skips_store() {
        let store = CountingStore::default();
        let enforcer = enforcer(store.clone());

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Admin, noon())
            .await
            .unwrap();

        assert_eq!(
            decision,
            QuotaDecision {
                category: EndpointCategory::Admin,
                allowed: false,
                remaining: 0,
                limit: 0,
                reset_seconds: 12 * 3600,
                fail_open: false,
            }
        );

        let decision = enforcer
            .check_only_at("u1", Tier::Free, EndpointCategory::Admin, noon())
            .await
            .unwrap();
        assert!(!decision.allowed);

        assert_eq!(store.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_exact() {
        let enforcer = enforcer(MemoryQuotaStore::new());

        let handles: Vec<_> = (0..150)
            .map(|_| {
                let enforcer = enforcer.clone();
                tokio::spawn(async move {
                    enforcer
                        .check_and_increment_at(
                            "u1",
                            Tier::Free,
                            EndpointCategory::Analytics,
                            noon(),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();

        let decisions = futures::future::join_all(handles).await;
        let allowed = decisions
            .into_iter()
            .map(|result| result.unwrap())
            .filter(|decision| decision.allowed)
            .count();

        assert_eq!(allowed, 100);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        turnstile_log::init_test!();
        let store = FlakyStore::new();
        let enforcer = enforcer(store.clone());

        for _ in 0..10 {
            enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
                .await
                .unwrap();
        }

        store.set_available(false);

        for _ in 0..200 {
            let decision = enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
                .await
                .unwrap();

            assert!(decision.allowed);
            assert!(decision.fail_open);
            assert_eq!(decision.remaining, 100);
            assert_eq!(decision.limit, 100);
        }

        let decision = enforcer
            .check_only_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();
        assert!(decision.allowed && decision.fail_open);

        store.set_available(true);

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();
        assert!(!decision.fail_open);
        assert_eq!(decision.remaining, 89);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_open() {
        turnstile_log::init_test!();
        let enforcer = QuotaEnforcer::new(StalledStore, TierLimitTable::default());

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Pro, EndpointCategory::Api, noon())
            .await
            .unwrap();

        assert!(decision.allowed);
        assert!(decision.fail_open);
        assert_eq!(decision.remaining, 50_000);
    }

    #[tokio::test]
    async fn test_day_boundary_grants_fresh_allowance() {
        let enforcer = enforcer(MemoryQuotaStore::new());
        let day_one: DateTime<Utc> = "2024-01-01T23:59:59Z".parse().unwrap();
        let day_two: DateTime<Utc> = "2024-01-02T00:00:01Z".parse().unwrap();

        for _ in 0..101 {
            enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, day_one)
                .await
                .unwrap();
        }

        let exhausted = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, day_one)
            .await
            .unwrap();
        assert!(!exhausted.allowed);
        assert_eq!(exhausted.reset_seconds, 1);

        let fresh = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, day_two)
            .await
            .unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 99);
    }

    #[tokio::test]
    async fn test_total_dominates_category() {
        let table = TierLimitTable {
            free: TierLimits {
                total: QuotaLimit::daily(150),
                ..TierLimits::FREE
            },
            ..Default::default()
        };
        let enforcer =
            QuotaEnforcer::new(MemoryQuotaStore::new(), table).timeout(Duration::from_secs(5));

        for _ in 0..150 {
            let decision = enforcer
                .check_and_increment_at("u1", Tier::Free, EndpointCategory::Api, noon())
                .await
                .unwrap();
            assert!(decision.allowed);
        }

        let peek = enforcer
            .check_only_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();
        assert!(!peek.allowed);
        assert_eq!(peek.remaining, 100);

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 99);
    }

    #[tokio::test]
    async fn test_check_only_does_not_count() {
        let store = MemoryQuotaStore::new();
        let enforcer = enforcer(store.clone());

        for _ in 0..3 {
            let decision = enforcer
                .check_only_at("u1", Tier::Free, EndpointCategory::Api, noon())
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1_000);
        }

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let enforcer = enforcer(MemoryQuotaStore::new());

        let result = enforcer
            .check_and_increment("u1", Tier::Free, EndpointCategory::Total)
            .await;
        assert!(matches!(result, Err(QuotaError::AggregateCategory)));

        let result = enforcer
            .check_and_increment("", Tier::Free, EndpointCategory::Api)
            .await;
        assert!(matches!(result, Err(QuotaError::InvalidUserId(_))));

        let result = enforcer
            .check_only("{u1}", Tier::Free, EndpointCategory::Api)
            .await;
        assert!(matches!(result, Err(QuotaError::InvalidUserId(_))));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let enforcer = enforcer(MemoryQuotaStore::new());
        let user = format!("user-{}", uuid::Uuid::new_v4());

        for _ in 0..5 {
            enforcer
                .check_and_increment_at(&user, Tier::Free, EndpointCategory::Api, noon())
                .await
                .unwrap();
        }

        let other = enforcer
            .check_and_increment_at("someone-else", Tier::Free, EndpointCategory::Api, noon())
            .await
            .unwrap();
        assert_eq!(other.remaining, 999);
    }

    #[test]
    fn test_headers() {
        let decision = QuotaDecision {
            category: EndpointCategory::Analytics,
            allowed: true,
            remaining: 41,
            limit: 100,
            reset_seconds: 3600,
            fail_open: false,
        };

        let headers = decision.headers();
        assert_eq!(headers["x-quota-limit"], "100");
        assert_eq!(headers["x-quota-remaining"], "41");
        assert_eq!(headers["x-quota-reset"], "3600");
        assert_eq!(headers["x-quota-category"], "analytics");
        assert!(!headers.contains_key(RETRY_AFTER));
        assert_eq!(decision.retry_after(), None);
        assert!(decision.into_result().is_ok());
    }

    #[test]
    fn test_denied_decision() {
        let decision = QuotaDecision {
            category: EndpointCategory::Api,
            allowed: false,
            remaining: 0,
            limit: 1_000,
            reset_seconds: 120,
            fail_open: false,
        };

        assert_eq!(decision.headers()[RETRY_AFTER], "120");
        assert_eq!(decision.retry_after(), Some(120));

        let exceeded = decision.into_result().unwrap_err();
        assert_eq!(exceeded.to_string(), "daily quota exceeded for category api");

        insta::assert_json_snapshot!(exceeded.decision(), @r###"
        {
          "category": "api",
          "allowed": false,
          "remaining": 0,
          "limit": 1000,
          "reset_seconds": 120,
          "fail_open": false
        }
        "###);
    }

    #[test]
    fn test_decision_metrics() {
        let captures = turnstile_statsd::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store = FlakyStore::new();
                let enforcer = enforcer(store.clone());

                enforcer
                    .check_and_increment_at("u1", Tier::Free, EndpointCategory::Admin, noon())
                    .await
                    .unwrap();

                enforcer
                    .check_only_at("u1", Tier::Free, EndpointCategory::Api, noon())
                    .await
                    .unwrap();

                store.set_available(false);
                let peek = enforcer
                    .check_only_at("u1", Tier::Free, EndpointCategory::Api, noon())
                    .await
                    .unwrap();
                assert!(peek.fail_open);

                enforcer
                    .check_and_increment_at("u1", Tier::Free, EndpointCategory::Api, noon())
                    .await
                    .unwrap();
            });
        });

        let captures: Vec<_> = captures
            .into_iter()
            .filter(|metric| !metric.starts_with("quota.store.duration"))
            .collect();

        assert_eq!(
            captures,
            [
                "quota.decision:1|c|#category:admin,tier:free,outcome:zero_limit",
                "quota.fail_open:1|c|#kind:unavailable",
                "quota.fail_open:1|c|#kind:unavailable",
                "quota.decision:1|c|#category:api,tier:free,outcome:fail_open",
            ]
        );
    }
}
