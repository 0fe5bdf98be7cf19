use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::{QuotaDecision, QuotaEnforcer, QuotaError, QuotaStore, Tier, classify_endpoint};

/// Looks up the subscription tier of a user.
pub trait TierResolver: Send + Sync {
    /// Returns the tier of the given user.
    fn resolve_user_tier(&self, user_id: &str) -> impl Future<Output = Tier> + Send;
}

/// A [`TierResolver`] backed by a fixed map.
///
/// Users without an entry resolve to the default tier.
#[derive(Clone, Debug, Default)]
pub struct StaticTierResolver {
    default_tier: Tier,
    user_tiers: Arc<HashMap<String, Tier>>,
}

impl StaticTierResolver {
    /// Creates a resolver that assigns `default_tier` to everyone.
    pub fn new(default_tier: Tier) -> Self {
        Self {
            default_tier,
            user_tiers: Arc::default(),
        }
    }

    /// Adds per-user overrides.
    pub fn with_users(mut self, users: impl IntoIterator<Item = (String, Tier)>) -> Self {
        Arc::make_mut(&mut self.user_tiers).extend(users);
        self
    }

    /// Resolves the tier without going through the async interface.
    pub fn tier_of(&self, user_id: &str) -> Tier {
        self.user_tiers
            .get(user_id)
            .copied()
            .unwrap_or(self.default_tier)
    }
}

impl TierResolver for StaticTierResolver {
    async fn resolve_user_tier(&self, user_id: &str) -> Tier {
        self.tier_of(user_id)
    }
}

/// Per-request entry point: resolves the tier, classifies the path and enforces the quota.
#[derive(Clone, Debug)]
pub struct QuotaGate<S, R> {
    enforcer: QuotaEnforcer<S>,
    resolver: R,
}

impl<S: QuotaStore, R: TierResolver> QuotaGate<S, R> {
    /// Creates a gate from an enforcer and a tier resolver.
    pub fn new(enforcer: QuotaEnforcer<S>, resolver: R) -> Self {
        Self { enforcer, resolver }
    }

    /// Returns the underlying enforcer.
    pub fn enforcer(&self) -> &QuotaEnforcer<S> {
        &self.enforcer
    }

    /// Checks and counts a request of `user_id` to `path`.
    pub async fn check_request(
        &self,
        user_id: &str,
        path: &str,
    ) -> Result<QuotaDecision, QuotaError> {
        let tier = self.resolver.resolve_user_tier(user_id).await;
        let category = classify_endpoint(path);
        self.enforcer
            .check_and_increment(user_id, tier, category)
            .await
    }
}
