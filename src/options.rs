use std::time::Duration;

/// Default number of attempts per call
pub const DEFAULT_RETRIES: u32 = 3;
/// Default per-attempt timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Per-call execution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Bypass the rate-limit check entirely
    pub skip_rate_limit: bool,
    /// Maximum attempts, the first one included
    pub retries: u32,
    /// Deadline applied to each attempt individually
    pub timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            skip_rate_limit: false,
            retries: DEFAULT_RETRIES,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl ExecutionOptions {
    #[must_use]
    pub fn skip_rate_limit(mut self) -> Self {
        self.skip_rate_limit = true;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of attempts actually made; a call always gets at least one
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ExecutionOptions::default();
        assert!(!options.skip_rate_limit);
        assert_eq!(options.retries, 3);
        assert_eq!(options.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_setters() {
        let options = ExecutionOptions::default()
            .skip_rate_limit()
            .with_retries(5)
            .with_timeout(Duration::from_millis(250));
        assert!(options.skip_rate_limit);
        assert_eq!(options.retries, 5);
        assert_eq!(options.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        assert_eq!(ExecutionOptions::default().with_retries(0).max_attempts(), 1);
        assert_eq!(ExecutionOptions::default().with_retries(4).max_attempts(), 4);
    }
}
