// Allow module inception - this is a common Rust pattern for protocol clients
#![allow(clippy::module_name_repetitions)]

use crate::error::{QueryError, QueryResult};
use crate::limiter::RateLimiter;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix applied to every counter key stored in Redis
const KEY_PREFIX: &str = "ratelimit:";

/// Increment a counter and start its expiry on first use, atomically
static INCREMENT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
",
    )
});

/// Fixed-window rate limiter shared across processes through Redis
///
/// Clone is cheap because ConnectionManager uses Arc internally, so every
/// check works on its own handle without locking.
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    max_requests: u64,
    window: Duration,
}

impl RedisRateLimiter {
    /// Connect to Redis and build a limiter allowing `max_requests` per `window`
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the connection fails
    pub async fn connect(address: &str, max_requests: u64, window: Duration) -> QueryResult<Self> {
        debug!("Connecting to rate-limit store at {}", address);

        if !is_valid_address(address) {
            return Err(QueryError::InvalidConfig(
                "Invalid Redis address format".to_string(),
            ));
        }

        let client = Client::open(format!("redis://{address}"))?;
        let connection = ConnectionManager::new(client).await?;

        info!("Connected to rate-limit store at {}", address);

        Ok(Self {
            connection,
            max_requests,
            window,
        })
    }

    /// Increment the counter for `key`, starting its expiry on first use
    async fn increment(&self, key: &str) -> QueryResult<u64> {
        let mut connection = self.connection.clone();
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);

        let count: u64 = INCREMENT_SCRIPT
            .key(counter_key(key))
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_allowed(&self, key: &str) -> bool {
        admit(key, self.increment(key).await, self.max_requests)
    }
}

/// Decide on a counter result; store failures let the call through
fn admit(key: &str, counted: QueryResult<u64>, max_requests: u64) -> bool {
    match counted {
        Ok(count) => {
            debug!("Rate-limit counter {key} at {count}/{max_requests}");
            count <= max_requests
        }
        Err(e) => {
            warn!("Rate-limit check for {key} failed, allowing call: {e}");
            true
        }
    }
}

fn counter_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

/// Validate a `host:port` address
fn is_valid_address(address: &str) -> bool {
    let Some((host, port)) = address.split_once(':') else {
        return false;
    };

    if port.contains(':') {
        return false;
    }

    if host.is_empty()
        || host.chars().any(char::is_whitespace)
        || host.contains(';')
        || host.contains('|')
        || host.contains('$')
        || host.contains('`')
        || host.contains('&')
        || host.contains('/')
    {
        return false;
    }

    port.parse::<u16>().is_ok()
}
