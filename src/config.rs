use crate::options::ExecutionOptions;
use clap::Parser;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Maximum length for a context string
const MAX_CONTEXT_LEN: usize = 128;

/// Allowed characters for a context string
static CONTEXT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("context pattern is a valid regex")
});

/// rqx - run a backend query with rate limiting, retries and timeouts
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Context label used for rate limiting and logging
    #[arg(short = 'c', long, env = "RQX_CONTEXT")]
    pub context: String,

    /// Maximum attempts, the first one included
    #[arg(short = 'r', long, env = "RQX_RETRIES", default_value = "3")]
    pub retries: u32,

    /// Per-attempt timeout in milliseconds
    #[arg(short = 't', long, env = "RQX_TIMEOUT_MS", default_value = "10000")]
    pub timeout_ms: u64,

    /// Skip the rate-limit check
    #[arg(long, env = "RQX_SKIP_RATE_LIMIT")]
    pub skip_rate_limit: bool,

    /// Unit of the linear backoff between attempts in milliseconds
    #[arg(long, env = "RQX_BACKOFF_BASE_MS", default_value = "1000")]
    pub backoff_base_ms: u64,

    /// Calls allowed per rate-limit window
    #[arg(long, env = "RQX_RATE_LIMIT_MAX", default_value = "10")]
    pub rate_limit_max: u64,

    /// Rate-limit window in milliseconds; keys rotate every bucket, so it
    /// cannot exceed --rate-limit-bucket-ms
    #[arg(long, env = "RQX_RATE_LIMIT_WINDOW_MS", default_value = "1000")]
    pub rate_limit_window_ms: u64,

    /// Width of the time bucket folded into rate-limit keys in milliseconds
    #[arg(long, env = "RQX_RATE_LIMIT_BUCKET_MS", default_value = "1000")]
    pub rate_limit_bucket_ms: u64,

    /// Redis address (host:port) for a rate limiter shared across processes
    #[arg(long, env = "RQX_REDIS_ADDRESS")]
    pub redis_address: Option<String>,

    /// Command answering the query, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_context(&self.context)?;

        if self.timeout_ms == 0 {
            anyhow::bail!("Timeout must be greater than 0");
        }

        if self.rate_limit_max == 0 {
            anyhow::bail!("Rate limit must allow at least one call");
        }

        if self.rate_limit_window_ms == 0 {
            anyhow::bail!("Rate-limit window must be greater than 0");
        }

        if self.rate_limit_bucket_ms == 0 {
            anyhow::bail!("Rate-limit bucket must be greater than 0");
        }

        if self.rate_limit_window_ms > self.rate_limit_bucket_ms {
            anyhow::bail!(
                "Rate-limit window ({}ms) cannot exceed the rate-limit bucket ({}ms)",
                self.rate_limit_window_ms,
                self.rate_limit_bucket_ms
            );
        }

        if self.command.first().map_or(true, String::is_empty) {
            anyhow::bail!("A command to run is required");
        }

        Ok(())
    }

    /// Per-call options derived from the flags
    #[must_use]
    pub fn execution_options(&self) -> ExecutionOptions {
        let options = ExecutionOptions::default()
            .with_retries(self.retries)
            .with_timeout(Duration::from_millis(self.timeout_ms));
        if self.skip_rate_limit {
            options.skip_rate_limit()
        } else {
            options
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn rate_limit_bucket(&self) -> Duration {
        Duration::from_millis(self.rate_limit_bucket_ms)
    }
}

/// Validate a context string
pub fn validate_context(context: &str) -> anyhow::Result<()> {
    if context.is_empty() {
        anyhow::bail!("Context cannot be empty");
    }

    if context.len() > MAX_CONTEXT_LEN {
        anyhow::bail!("Context cannot exceed {MAX_CONTEXT_LEN} characters");
    }

    if !CONTEXT_PATTERN.is_match(context) {
        anyhow::bail!(
            "Context can only contain alphanumeric characters, '_', '-', '.' and ':'"
        );
    }

    Ok(())
}
