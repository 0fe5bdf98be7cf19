use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::timed;
use crate::{
    DEFAULT_STORE_TIMEOUT, EndpointCategory, QuotaError, QuotaKeySpace, QuotaStore, StoreError,
    StoreOperation, Tier, TierLimitTable, TierLimits, validate_user_id,
};

/// Usage of one category.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct CategoryUsage {
    /// Requests counted today, including denied ones.
    pub used: u64,
    /// The daily ceiling.
    pub limit: u64,
    /// Requests left today.
    pub remaining: u64,
}

/// Usage of every category of a user on one day.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UsageSnapshot(BTreeMap<EndpointCategory, CategoryUsage>);

impl UsageSnapshot {
    /// Returns the usage of a category.
    pub fn get(&self, category: EndpointCategory) -> Option<&CategoryUsage> {
        self.0.get(&category)
    }

    /// Iterates categories in their canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (EndpointCategory, &CategoryUsage)> + '_ {
        self.0.iter().map(|(category, usage)| (*category, usage))
    }
}

/// Introspection and overrides for quota counters.
///
/// Unlike the [`QuotaEnforcer`](crate::QuotaEnforcer), admin operations do not fail open. Store
/// failures are returned as [`QuotaError::Store`].
#[derive(Clone, Debug)]
pub struct QuotaAdmin<S> {
    store: S,
    table: Arc<TierLimitTable>,
    key_space: QuotaKeySpace,
    timeout: Duration,
}

impl<S: QuotaStore> QuotaAdmin<S> {
    /// Creates an admin interface over the given store and ceilings.
    pub fn new(store: S, table: TierLimitTable) -> Self {
        Self::from_parts(
            store,
            Arc::new(table),
            QuotaKeySpace::default(),
            DEFAULT_STORE_TIMEOUT,
        )
    }

    pub(crate) fn from_parts(
        store: S,
        table: Arc<TierLimitTable>,
        key_space: QuotaKeySpace,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            table,
            key_space,
            timeout,
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

    /// Returns the ceilings of a tier.
    pub fn limits_for(&self, tier: Tier) -> &TierLimits {
        self.table.limits_for(tier)
    }

    /// Returns the ceilings of every tier.
    pub fn all_tier_limits(&self) -> BTreeMap<Tier, TierLimits> {
        self.table.all_tier_limits()
    }

    /// Reads today's usage of every category, including the aggregate.
    pub async fn usage_snapshot(
        &self,
        user_id: &str,
        tier: Tier,
    ) -> Result<UsageSnapshot, QuotaError> {
        self.usage_snapshot_at(user_id, tier, Utc::now()).await
    }

    /// Reads the usage of every category on the UTC day of `now`.
    pub async fn usage_snapshot_at(
        &self,
        user_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, QuotaError> {
        validate_user_id(user_id)?;

        let (categories, keys): (Vec<_>, Vec<_>) =
            self.key_space.keys_for_day(user_id, now).into_iter().unzip();

        let values = timed(
            StoreOperation::MultiGet,
            self.timeout,
            self.store.multi_get(&keys),
        )
        .await?;

        if values.len() != keys.len() {
            return Err(StoreError::unavailable("unexpected number of counters").into());
        }

        let limits = self.table.limits_for(tier);
        let usage = categories
            .into_iter()
            .zip(values)
            .map(|(category, used)| {
                let limit = limits.get(category).requests_per_window;
                let usage = CategoryUsage {
                    used,
                    limit,
                    remaining: limit.saturating_sub(used),
                };
                (category, usage)
            })
            .collect();

        Ok(UsageSnapshot(usage))
    }

    /// Deletes today's counter of one category, or all of the user's counters for today.
    ///
    /// Returns the number of counters that existed.
    pub async fn reset(
        &self,
        user_id: &str,
        category: Option<EndpointCategory>,
    ) -> Result<u64, QuotaError> {
        self.reset_at(user_id, category, Utc::now()).await
    }

    /// Deletes counters on the UTC day of `now`.
    ///
    /// Resetting a single concrete category leaves the aggregate untouched.
    pub async fn reset_at(
        &self,
        user_id: &str,
        category: Option<EndpointCategory>,
        now: DateTime<Utc>,
    ) -> Result<u64, QuotaError> {
        validate_user_id(user_id)?;

        let keys = match category {
            Some(category) => vec![self.key_space.key_for(user_id, category, now).0],
            None => self
                .key_space
                .keys_for_day(user_id, now)
                .into_iter()
                .map(|(_, key)| key)
                .collect(),
        };

        let deleted = timed(
            StoreOperation::Delete,
            self.timeout,
            self.store.delete(&keys),
        )
        .await?;

        turnstile_log::info!(
            user_id,
            category = category.map_or("all", EndpointCategory::name),
            deleted,
            "reset quota counters",
        );

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryQuotaStore, QuotaEnforcer, QuotaKey};

    fn noon() -> DateTime<Utc> {
        "2024-05-10T12:00:00Z".parse().unwrap()
    }

    async fn spend(
        enforcer: &QuotaEnforcer<MemoryQuotaStore>,
        user_id: &str,
        category: EndpointCategory,
        count: usize,
    ) {
        for _ in 0..count {
            enforcer
                .check_and_increment_at(user_id, Tier::Free, category, noon())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_usage_snapshot() {
        let enforcer = QuotaEnforcer::new(MemoryQuotaStore::new(), TierLimitTable::default());
        spend(&enforcer, "u1", EndpointCategory::Analytics, 3).await;
        spend(&enforcer, "u1", EndpointCategory::Api, 2).await;

        let snapshot = enforcer
            .admin()
            .usage_snapshot_at("u1", Tier::Free, noon())
            .await
            .unwrap();

        insta::assert_json_snapshot!(snapshot, @r###"
        {
          "analytics": {
            "used": 3,
            "limit": 100,
            "remaining": 97
          },
          "api": {
            "used": 2,
            "limit": 1000,
            "remaining": 998
          },
          "admin": {
            "used": 0,
            "limit": 0,
            "remaining": 0
          },
          "public": {
            "used": 0,
            "limit": 5000,
            "remaining": 5000
          },
          "total": {
            "used": 5,
            "limit": 5000,
            "remaining": 4995
          }
        }
        "###);
    }

    #[tokio::test]
    async fn test_reset_single_category() {
        let enforcer = QuotaEnforcer::new(MemoryQuotaStore::new(), TierLimitTable::default());
        let admin = enforcer.admin();

        spend(&enforcer, "u1", EndpointCategory::Analytics, 100).await;
        spend(&enforcer, "u1", EndpointCategory::Api, 7).await;
        spend(&enforcer, "u2", EndpointCategory::Analytics, 4).await;

        let deleted = admin
            .reset_at("u1", Some(EndpointCategory::Analytics), noon())
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let u1 = admin.usage_snapshot_at("u1", Tier::Free, noon()).await.unwrap();
        assert_eq!(u1.get(EndpointCategory::Analytics).unwrap().used, 0);
        assert_eq!(u1.get(EndpointCategory::Api).unwrap().used, 7);
        assert_eq!(u1.get(EndpointCategory::Total).unwrap().used, 107);

        let u2 = admin.usage_snapshot_at("u2", Tier::Free, noon()).await.unwrap();
        assert_eq!(u2.get(EndpointCategory::Analytics).unwrap().used, 4);
        assert_eq!(u2.get(EndpointCategory::Total).unwrap().used, 4);

        let decision = enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Analytics, noon())
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 99);
    }

    #[tokio::test]
    async fn test_reset_all_categories() {
        let enforcer = QuotaEnforcer::new(MemoryQuotaStore::new(), TierLimitTable::default());
        let admin = enforcer.admin();
        let yesterday: DateTime<Utc> = "2024-05-09T12:00:00Z".parse().unwrap();

        spend(&enforcer, "u1", EndpointCategory::Analytics, 2).await;
        spend(&enforcer, "u1", EndpointCategory::Public, 2).await;
        enforcer
            .check_and_increment_at("u1", Tier::Free, EndpointCategory::Api, yesterday)
            .await
            .unwrap();

        let deleted = admin.reset_at("u1", None, noon()).await.unwrap();
        assert_eq!(deleted, 3);

        let today = admin.usage_snapshot_at("u1", Tier::Free, noon()).await.unwrap();
        assert!(today.iter().all(|(_, usage)| usage.used == 0));

        let before = admin
            .usage_snapshot_at("u1", Tier::Free, yesterday)
            .await
            .unwrap();
        assert_eq!(before.get(EndpointCategory::Api).unwrap().used, 1);
    }

    #[derive(Clone, Debug)]
    struct BrokenStore;

    impl QuotaStore for BrokenStore {
        async fn increment_with_expiry(
            &self,
            _keys: &[QuotaKey],
            _ttl_seconds: u64,
        ) -> Result<Vec<u64>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn multi_get(&self, _keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn delete(&self, _keys: &[QuotaKey]) -> Result<u64, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_admin_does_not_fail_open() {
        let admin = QuotaAdmin::new(BrokenStore, TierLimitTable::default());

        let result = admin.usage_snapshot("u1", Tier::Pro).await;
        assert!(matches!(result, Err(QuotaError::Store(StoreError::Unavailable(_)))));

        let result = admin.reset("u1", None).await;
        assert!(matches!(result, Err(QuotaError::Store(_))));
    }

    /// Answers reads with fewer values than keys.
    #[derive(Clone, Debug)]
    struct TruncatingStore;

    impl QuotaStore for TruncatingStore {
        async fn increment_with_expiry(
            &self,
            keys: &[QuotaKey],
            _ttl_seconds: u64,
        ) -> Result<Vec<u64>, StoreError> {
            Ok(vec![1; keys.len()])
        }

        async fn multi_get(&self, _keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
            Ok(vec![7, 3])
        }

        async fn delete(&self, _keys: &[QuotaKey]) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_snapshot_rejects_short_reply() {
        let admin = QuotaAdmin::new(TruncatingStore, TierLimitTable::default());

        let result = admin.usage_snapshot("u1", Tier::Free).await;
        assert!(matches!(result, Err(QuotaError::Store(StoreError::Unavailable(_)))));
    }

    #[test]
    fn test_limits_passthrough() {
        let admin = QuotaAdmin::new(MemoryQuotaStore::new(), TierLimitTable::default());
        assert_eq!(admin.limits_for(Tier::Pro), &TierLimits::PRO);
        assert_eq!(admin.all_tier_limits().len(), 3);
    }
}
