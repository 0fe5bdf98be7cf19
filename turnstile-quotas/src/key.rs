use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};

use crate::{EndpointCategory, QuotaError};

/// Seconds in a UTC day, the upper bound of every counter TTL.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// The default prefix of counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "quota";

/// The identity of a shared counter.
///
/// Keys have the form `{prefix}:{{user_id}}:{category}:{YYYY-MM-DD}`. The braces around the user
/// id are a Redis Cluster hash tag, which places all counters of a user on the same slot.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QuotaKey(String);

impl QuotaKey {
    /// Returns the rendered key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QuotaKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Derives counter keys and their lifetime from a user, a category and the current time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuotaKeySpace {
    prefix: String,
}

impl QuotaKeySpace {
    /// Creates a key space with a custom prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the counter key for the UTC day of `now` and the seconds until it expires.
    pub fn key_for(
        &self,
        user_id: &str,
        category: EndpointCategory,
        now: DateTime<Utc>,
    ) -> (QuotaKey, u64) {
        let key = format!(
            "{}:{{{user_id}}}:{category}:{}",
            self.prefix,
            day_bucket(now)
        );
        (QuotaKey(key), reset_seconds(now))
    }

    /// Returns the keys of all categories, including the aggregate, for the UTC day of `now`.
    pub fn keys_for_day(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<(EndpointCategory, QuotaKey)> {
        EndpointCategory::ALL
            .into_iter()
            .map(|category| (category, self.key_for(user_id, category, now).0))
            .collect()
    }
}

impl Default for QuotaKeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

/// Returns the UTC calendar day of `now` as `YYYY-MM-DD`.
pub fn day_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Returns the number of seconds from `now` until the next UTC midnight.
///
/// The result is clamped to `[1, 86400]`, so a counter created in the last fraction of a second of
/// a day still receives a positive TTL.
pub fn reset_seconds(now: DateTime<Utc>) -> u64 {
    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return 1;
    };

    let midnight = tomorrow.and_time(NaiveTime::MIN).and_utc();
    let seconds = (midnight - now).num_seconds().clamp(1, SECONDS_PER_DAY as i64);
    seconds as u64
}

/// Checks that a user id can be embedded in a counter key.
///
/// Empty ids and ids containing braces are rejected, braces would break the cluster hash tag.
pub fn validate_user_id(user_id: &str) -> Result<(), QuotaError> {
    if user_id.is_empty() || user_id.contains(['{', '}']) {
        return Err(QuotaError::InvalidUserId(user_id.to_owned()));
    }
    Ok(())
}
