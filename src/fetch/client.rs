use crate::fetch::{FetchError, FetchFailure, FetchOutcome, RetryPolicy};
use crate::source::{DetailFetcher, Record, WorkItem};
use std::sync::Arc;

/// Retrying wrapper around a `DetailFetcher`
pub struct FetchClient {
    fetcher: Arc<dyn DetailFetcher>,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(fetcher: Arc<dyn DetailFetcher>, policy: RetryPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches one work item's detail and merges it into a record
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Attempt exceeds `attempt_timeout` | Retry after backoff |
    /// | Connection error | Retry after backoff |
    /// | Status in retryable set | Retry after backoff (or `Retry-After`) |
    /// | Any other status | Immediate failure |
    /// | Parse or malformed data | Immediate failure |
    ///
    /// At most `max_attempts()` attempts are made. Exhaustion yields a
    /// failure carrying the last error and `retries_exhausted = true`.
    pub async fn fetch(&self, item: &WorkItem) -> FetchOutcome {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.fetcher.fetch_detail(item),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout),
            };

            let err = match result {
                Ok(detail) => {
                    tracing::debug!(id = %item.id, attempt, "fetched detail");
                    return FetchOutcome::Success(Record::merge(item, detail));
                }
                Err(err) => err,
            };

            if !self.policy.is_retryable(&err) {
                tracing::debug!(id = %item.id, error = %err, "permanent fetch failure");
                return self.failure(item, &err, attempt, false);
            }

            if attempt >= self.policy.max_attempts() {
                tracing::warn!(
                    id = %item.id,
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return self.failure(item, &err, attempt, true);
            }

            let delay = self.policy.delay_for(attempt, &err);
            tracing::warn!(
                id = %item.id,
                attempt,
                error = %err,
                "transient fetch failure, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn failure(
        &self,
        item: &WorkItem,
        err: &FetchError,
        attempts: u32,
        retries_exhausted: bool,
    ) -> FetchOutcome {
        FetchOutcome::Failure(FetchFailure {
            id: item.id.clone(),
            cause: err.to_string(),
            retries_exhausted,
            attempts,
        })
    }
}
