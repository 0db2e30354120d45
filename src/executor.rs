// Allow module inception - this is a common Rust pattern for service types
#![allow(clippy::module_name_repetitions)]

use crate::bound::BoundQuery;
use crate::error::QueryError;
use crate::limiter::{rate_limit_key, RateLimiter, DEFAULT_BUCKET_MS};
use crate::options::ExecutionOptions;
use crate::outcome::{ErrorInfo, QueryOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default unit of the linear backoff between attempts
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Why a single attempt did not produce a successful outcome
#[derive(Debug)]
enum AttemptFailure {
    /// The backend answered with an error
    Returned(ErrorInfo),
    /// The query function itself failed before producing an outcome
    Raised(ErrorInfo),
    /// The attempt did not finish before its deadline
    TimedOut(ErrorInfo),
}

impl AttemptFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Returned(info) => info.is_retryable(),
            Self::Raised(_) | Self::TimedOut(_) => true,
        }
    }

    fn info(&self) -> &ErrorInfo {
        match self {
            Self::Returned(info) | Self::Raised(info) | Self::TimedOut(info) => info,
        }
    }

    fn into_info(self) -> ErrorInfo {
        match self {
            Self::Returned(info) | Self::Raised(info) | Self::TimedOut(info) => info,
        }
    }
}

/// Executes backend queries with rate limiting, retries and timeouts
///
/// Cloning is cheap; clones share the same rate limiter.
#[derive(Clone)]
pub struct QueryExecutor {
    limiter: Arc<dyn RateLimiter>,
    backoff_base: Duration,
    bucket: Duration,
}

impl QueryExecutor {
    /// Create an executor that checks calls against `limiter`
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            bucket: Duration::from_millis(DEFAULT_BUCKET_MS),
        }
    }

    /// Set the unit of the linear backoff (attempt `n` waits `n * base`)
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the width of the time bucket folded into rate-limit keys
    #[must_use]
    pub fn with_bucket(mut self, bucket: Duration) -> Self {
        self.bucket = bucket;
        self
    }

    /// Delay inserted after the given failed attempt
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    /// Pre-bind a query function to a context
    pub fn bind<F>(&self, context: impl Into<String>, query_fn: F) -> BoundQuery<F> {
        BoundQuery::new(self.clone(), context.into(), query_fn)
    }

    /// Execute a query function
    ///
    /// Always resolves to an outcome; failures are reported in-band through
    /// `QueryOutcome::error`. An `Err` from `query_fn` is treated as a
    /// transient failure. Retried calls are not deduplicated, so callers
    /// wrapping writes must make them idempotent themselves.
    pub async fn execute<T, F, Fut>(
        &self,
        query_fn: F,
        context: &str,
        options: ExecutionOptions,
    ) -> QueryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<QueryOutcome<T>>>,
    {
        self.execute_with_cancel(query_fn, context, options, &CancellationToken::new())
            .await
    }

    /// Execute a query function that can be aborted through `cancel`
    ///
    /// Cancelling drops the in-flight attempt (or interrupts the backoff
    /// sleep) and resolves to a non-retryable "Query cancelled" error.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        mut query_fn: F,
        context: &str,
        options: ExecutionOptions,
        cancel: &CancellationToken,
    ) -> QueryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<QueryOutcome<T>>>,
    {
        let call_id = Uuid::new_v4();

        if cancel.is_cancelled() {
            return cancelled(context, call_id);
        }

        if !options.skip_rate_limit {
            let key = rate_limit_key(context, SystemTime::now(), self.bucket);
            if !self.limiter.is_allowed(&key).await {
                warn!("Rate limit exceeded for {context} (call {call_id})");
                let err = QueryError::RateLimited(context.to_string());
                return QueryOutcome::failure(ErrorInfo::from(&err));
            }
        }

        let max_attempts = options.max_attempts();
        let mut attempt = 1;

        loop {
            // select! builds every branch future up front, so check before calling query_fn
            if cancel.is_cancelled() {
                return cancelled(context, call_id);
            }

            debug!("Query {context} (call {call_id}) attempt {attempt}/{max_attempts}");

            let failure = tokio::select! {
                biased;

                () = cancel.cancelled() => return cancelled(context, call_id),

                result = run_attempt(query_fn(), options.timeout) => match result {
                    Ok(outcome) => {
                        if attempt > 1 {
                            info!("Query {context} (call {call_id}) succeeded on attempt {attempt}");
                        }
                        return outcome;
                    }
                    Err(failure) => failure,
                },
            };

            if !failure.is_retryable() {
                let info = failure.into_info();
                warn!("Query {context} (call {call_id}) failed with non-retryable error: {info}");
                return QueryOutcome::failure(info);
            }

            if attempt >= max_attempts {
                let info = failure.into_info();
                error!("Query {context} (call {call_id}) failed after {attempt} attempts: {info}");
                return QueryOutcome::failure(info);
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                "Query {context} (call {call_id}) attempt {attempt} failed: {}, retrying in {}ms",
                failure.info(),
                delay.as_millis()
            );

            tokio::select! {
                biased;

                () = cancel.cancelled() => return cancelled(context, call_id),
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

/// Race one invocation of the query function against its deadline
///
/// The attempt future is dropped when the deadline fires, which cancels it
/// at its next suspension point.
async fn run_attempt<T, Fut>(
    attempt: Fut,
    timeout: Duration,
) -> Result<QueryOutcome<T>, AttemptFailure>
where
    Fut: Future<Output = anyhow::Result<QueryOutcome<T>>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(outcome)) => match outcome.error {
            Some(info) => Err(AttemptFailure::Returned(info)),
            None => Ok(QueryOutcome {
                data: outcome.data,
                error: None,
            }),
        },
        Ok(Err(e)) => Err(AttemptFailure::Raised(ErrorInfo::new(format!("{e:#}")))),
        Err(_) => Err(AttemptFailure::TimedOut(ErrorInfo::from(
            &QueryError::Timeout(timeout),
        ))),
    }
}

fn cancelled<T>(context: &str, call_id: Uuid) -> QueryOutcome<T> {
    info!("Query {context} (call {call_id}) cancelled");
    QueryOutcome::failure(ErrorInfo::from(&QueryError::Cancelled))
}
