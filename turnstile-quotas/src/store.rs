use std::error::Error;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::QuotaKey;
use crate::statsd::QuotaTimers;

/// The operations a [`QuotaStore`] performs, used to tag timing metrics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreOperation {
    /// Atomic increment with expiry.
    Increment,
    /// Batched read.
    MultiGet,
    /// Batched delete.
    Delete,
}

impl StoreOperation {
    /// Returns the metric tag value of this operation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Increment => "increment",
            Self::MultiGet => "multi_get",
            Self::Delete => "delete",
        }
    }
}

/// Failure to reach the shared counter store.
///
/// Both variants mean the same thing to the enforcer: the store could not answer and the request
/// has to be decided without it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store rejected the operation or could not be reached.
    #[error("quota store is unavailable")]
    Unavailable(#[source] Box<dyn Error + Send + Sync>),

    /// The store did not answer in time.
    #[error("quota store did not respond within {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Wraps a transport or protocol error.
    pub fn unavailable(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Unavailable(error.into())
    }

    /// Returns a short identifier of the failure, used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// A shared, network-accessible store of expiring counters.
///
/// Implementations must make [`increment_with_expiry`](Self::increment_with_expiry) atomic across
/// all given keys and across all processes sharing the store. There is no in-process locking on
/// top of it.
pub trait QuotaStore: Clone + Send + Sync {
    /// Increments every key by one and sets its TTL in a single atomic step.
    ///
    /// Returns the counts after the increment, in the order of `keys`.
    fn increment_with_expiry(
        &self,
        keys: &[QuotaKey],
        ttl_seconds: u64,
    ) -> impl Future<Output = Result<Vec<u64>, StoreError>> + Send;

    /// Reads the current value of every key. Missing keys read as `0`.
    fn multi_get(
        &self,
        keys: &[QuotaKey],
    ) -> impl Future<Output = Result<Vec<u64>, StoreError>> + Send;

    /// Deletes the given keys and returns how many existed.
    fn delete(&self, keys: &[QuotaKey]) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Increments a single key by one and sets its TTL.
    fn increment_one(
        &self,
        key: &QuotaKey,
        ttl_seconds: u64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send {
        async move {
            let counts = self
                .increment_with_expiry(std::slice::from_ref(key), ttl_seconds)
                .await?;

            counts
                .first()
                .copied()
                .ok_or_else(|| StoreError::unavailable("store returned no count"))
        }
    }
}

/// Runs a store operation with a deadline.
///
/// If the operation does not complete within `timeout`, it is dropped and
/// [`StoreError::Timeout`] is returned.
pub async fn bounded<T>(
    timeout: Duration,
    operation: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// Like [`bounded`], and records the duration of the operation.
pub(crate) async fn timed<T>(
    operation: StoreOperation,
    timeout: Duration,
    future: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let start = Instant::now();
    let result = bounded(timeout, future).await;
    turnstile_statsd::metric!(
        timer(QuotaTimers::StoreDuration) = start.elapsed(),
        operation = operation.name(),
    );
    result
}
