use std::sync::LazyLock;

use crate::redis::Script;

static INCREMENT_QUOTA: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/increment_quota.lua")));

/// A collection of static methods to load predefined Redis scripts.
pub struct RedisScripts;

impl RedisScripts {
    /// Loads the script that increments a batch of quota counters atomically.
    ///
    /// The script takes the counter keys and a single argument, the expiry in seconds applied to
    /// every counter. It returns the incremented values in key order.
    pub fn load_increment_quota() -> &'static Script {
        &INCREMENT_QUOTA
    }
}
