//! Tiered daily quotas for Turnstile.
//!
//! Every user has a daily request budget per [`EndpointCategory`], plus an aggregate budget
//! across all categories. The budgets depend on the user's subscription [`Tier`] and are
//! configured in a [`TierLimitTable`].
//!
//! Usage is tracked in shared counters behind the [`QuotaStore`] trait. The [`QuotaEnforcer`]
//! increments a category counter and the aggregate counter in a single atomic step and decides
//! whether the request is allowed. When the store cannot be reached within the configured timeout,
//! the enforcer fails open and admits the request.
//!
//! ```
//! use turnstile_quotas::{EndpointCategory, MemoryQuotaStore, QuotaEnforcer, Tier, TierLimitTable};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let enforcer = QuotaEnforcer::new(MemoryQuotaStore::new(), TierLimitTable::default());
//! let decision = enforcer
//!     .check_and_increment("user-1", Tier::Free, EndpointCategory::Analytics)
//!     .await
//!     .unwrap();
//!
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 99);
//! # });
//! ```
#![warn(missing_docs)]

mod admin;
mod category;
mod enforcer;
mod gate;
mod key;
mod memory;
mod statsd;
mod store;
mod telemetry;
mod tier;

pub use self::admin::*;
pub use self::category::*;
pub use self::enforcer::*;
pub use self::gate::*;
pub use self::key::*;
pub use self::memory::*;
pub use self::store::*;
pub use self::telemetry::*;
pub use self::tier::*;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::*;
