// Public exports for library usage
pub mod bound;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod options;
pub mod outcome;
pub mod redis_limiter;

pub use bound::BoundQuery;
pub use error::{QueryError, QueryResult};
pub use executor::QueryExecutor;
pub use limiter::{rate_limit_key, NoopLimiter, RateLimiter, SlidingWindowLimiter};
pub use options::ExecutionOptions;
pub use outcome::{ErrorInfo, QueryOutcome};
