use crate::executor::QueryExecutor;
use crate::options::ExecutionOptions;
use crate::outcome::QueryOutcome;
use std::future::Future;

/// A query function pre-bound to an executor and a context
///
/// Named operations ("fetch countries", "save calculation", ...) are built
/// as `BoundQuery` values; calling one is exactly `executor.execute` with
/// the bound function and context.
pub struct BoundQuery<F> {
    executor: QueryExecutor,
    context: String,
    query_fn: F,
}

impl<F> BoundQuery<F> {
    pub(crate) fn new(executor: QueryExecutor, context: String, query_fn: F) -> Self {
        Self {
            executor,
            context,
            query_fn,
        }
    }

    /// Context used for rate limiting and logging
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Run with default options
    pub async fn call<T, Fut>(&mut self) -> QueryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<QueryOutcome<T>>>,
    {
        self.call_with(ExecutionOptions::default()).await
    }

    /// Run with explicit options
    pub async fn call_with<T, Fut>(&mut self, options: ExecutionOptions) -> QueryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<QueryOutcome<T>>>,
    {
        self.executor
            .execute(&mut self.query_fn, &self.context, options)
            .await
    }
}
