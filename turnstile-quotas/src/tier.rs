use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EndpointCategory;

/// Subscription level of a user.
///
/// The tier is supplied by the caller, it is never looked up by the quota engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// The free plan.
    #[default]
    Free,
    /// The paid plan.
    Pro,
    /// The enterprise plan.
    Enterprise,
}

impl Tier {
    /// All tiers, from lowest to highest.
    pub const ALL: [Self; 3] = [Self::Free, Self::Pro, Self::Enterprise];

    /// Returns the canonical name of this tier.
    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown [`Tier`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown tier `{0}`")]
pub struct ParseTierError(String);

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseTierError(s.to_owned()))
    }
}

/// The window over which a [`QuotaLimit`] is counted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    /// Counters reset at midnight UTC.
    #[default]
    Daily,
}

/// A request ceiling for one category.
///
/// In configuration files, a limit can be written as a bare number, which is short for a daily
/// limit with that many requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "QuotaLimitRepr")]
pub struct QuotaLimit {
    /// Number of requests admitted per window. Zero blocks the category entirely.
    pub requests_per_window: u64,
    /// The counting window.
    pub window: QuotaWindow,
}

impl QuotaLimit {
    /// Creates a daily limit.
    pub const fn daily(requests_per_window: u64) -> Self {
        Self {
            requests_per_window,
            window: QuotaWindow::Daily,
        }
    }

    /// Returns `true` if no request is ever admitted.
    pub fn is_zero(&self) -> bool {
        self.requests_per_window == 0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuotaLimitRepr {
    Requests(u64),
    Full {
        requests_per_window: u64,
        #[serde(default)]
        window: QuotaWindow,
    },
}

impl From<QuotaLimitRepr> for QuotaLimit {
    fn from(repr: QuotaLimitRepr) -> Self {
        match repr {
            QuotaLimitRepr::Requests(requests_per_window) => Self::daily(requests_per_window),
            QuotaLimitRepr::Full {
                requests_per_window,
                window,
            } => Self {
                requests_per_window,
                window,
            },
        }
    }
}

/// Daily ceilings of a single tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Ceiling for analytics endpoints.
    pub analytics: QuotaLimit,
    /// Ceiling for general API endpoints.
    pub api: QuotaLimit,
    /// Ceiling for administrative endpoints.
    pub admin: QuotaLimit,
    /// Ceiling for public endpoints.
    pub public: QuotaLimit,
    /// Combined ceiling across all categories.
    pub total: QuotaLimit,
}

impl TierLimits {
    /// Built-in ceilings of the free tier.
    pub const FREE: Self = Self {
        analytics: QuotaLimit::daily(100),
        api: QuotaLimit::daily(1_000),
        admin: QuotaLimit::daily(0),
        public: QuotaLimit::daily(5_000),
        total: QuotaLimit::daily(5_000),
    };

    /// Built-in ceilings of the pro tier.
    pub const PRO: Self = Self {
        analytics: QuotaLimit::daily(10_000),
        api: QuotaLimit::daily(50_000),
        admin: QuotaLimit::daily(0),
        public: QuotaLimit::daily(100_000),
        total: QuotaLimit::daily(100_000),
    };

    /// Built-in ceilings of the enterprise tier.
    pub const ENTERPRISE: Self = Self {
        analytics: QuotaLimit::daily(100_000),
        api: QuotaLimit::daily(500_000),
        admin: QuotaLimit::daily(10_000),
        public: QuotaLimit::daily(1_000_000),
        total: QuotaLimit::daily(1_000_000),
    };

    /// Returns the limit of the given category.
    pub fn get(&self, category: EndpointCategory) -> QuotaLimit {
        match category {
            EndpointCategory::Analytics => self.analytics,
            EndpointCategory::Api => self.api,
            EndpointCategory::Admin => self.admin,
            EndpointCategory::Public => self.public,
            EndpointCategory::Total => self.total,
        }
    }

    /// Returns the combined limit across all categories.
    pub fn total(&self) -> QuotaLimit {
        self.total
    }

    /// Iterates all categories with their limits, including the aggregate.
    pub fn iter(&self) -> impl Iterator<Item = (EndpointCategory, QuotaLimit)> + '_ {
        EndpointCategory::ALL
            .into_iter()
            .map(|category| (category, self.get(category)))
    }
}

fn default_free() -> TierLimits {
    TierLimits::FREE
}

fn default_pro() -> TierLimits {
    TierLimits::PRO
}

fn default_enterprise() -> TierLimits {
    TierLimits::ENTERPRISE
}

/// Maps each [`Tier`] to its daily ceilings.
///
/// Tiers omitted from a configuration file fall back to the built-in ceilings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TierLimitTable {
    /// Ceilings of the free tier.
    #[serde(default = "default_free")]
    pub free: TierLimits,
    /// Ceilings of the pro tier.
    #[serde(default = "default_pro")]
    pub pro: TierLimits,
    /// Ceilings of the enterprise tier.
    #[serde(default = "default_enterprise")]
    pub enterprise: TierLimits,
}

impl TierLimitTable {
    /// Returns the ceilings of the given tier.
    pub fn limits_for(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Enterprise => &self.enterprise,
        }
    }

    /// Returns the ceilings of every tier.
    pub fn all_tier_limits(&self) -> BTreeMap<Tier, TierLimits> {
        Tier::ALL
            .into_iter()
            .map(|tier| (tier, *self.limits_for(tier)))
            .collect()
    }
}

impl Default for TierLimitTable {
    fn default() -> Self {
        Self {
            free: TierLimits::FREE,
            pro: TierLimits::PRO,
            enterprise: TierLimits::ENTERPRISE,
        }
    }
}
