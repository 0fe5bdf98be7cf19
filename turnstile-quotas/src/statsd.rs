use turnstile_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Timer metrics used by the quota engine.
pub enum QuotaTimers {
    /// Duration of a round trip to the quota store, including the timeout.
    ///
    /// This metric is tagged with:
    ///  - `operation`: `increment`, `multi_get` or `delete`.
    StoreDuration,
}

impl TimerMetric for QuotaTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::StoreDuration => "quota.store.duration",
        }
    }
}

/// Counter metrics used by the quota engine.
pub enum QuotaCounters {
    /// Number of enforcement decisions. Read-only checks are not counted.
    ///
    /// This metric is tagged with:
    ///  - `category`: The endpoint category that was checked.
    ///  - `tier`: The subscription tier of the user.
    ///  - `outcome`: `allowed`, `denied`, `zero_limit` or `fail_open`.
    Decision,

    /// Number of decisions taken without consulting the store.
    ///
    /// This metric is tagged with:
    ///  - `kind`: `unavailable` or `timeout`.
    FailOpen,
}

impl CounterMetric for QuotaCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Decision => "quota.decision",
            Self::FailOpen => "quota.fail_open",
        }
    }
}

/// Gauge metrics used by the quota engine.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
pub enum QuotaGauges {
    /// Number of connections in the redis pool, reported before each store call.
    RedisConnections,
    /// Number of idle connections in the redis pool.
    RedisIdleConnections,
}

impl GaugeMetric for QuotaGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::RedisConnections => "quota.redis.connections",
            Self::RedisIdleConnections => "quota.redis.idle_connections",
        }
    }
}
