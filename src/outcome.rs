use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Message surfaced when the rate limiter denies a call
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Substring that marks an error as an authentication failure
const AUTH_MARKER: &str = "auth";

/// Uniform result shape returned by every query execution
///
/// Exactly one of `data` / `error` is meaningful. `data` is always `None`
/// when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome<T> {
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
}

/// Minimal structured error description surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    /// Backend error code; numbers on the wire are normalised to strings
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_code"
    )]
    pub code: Option<String>,
}

impl<T> QueryOutcome<T> {
    /// Create a successful outcome
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Create a failed outcome
    #[must_use]
    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    /// Whether the outcome carries no error
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`, treating a missing payload on success as `None`
    ///
    /// # Errors
    ///
    /// Returns the carried `ErrorInfo` if the outcome failed
    pub fn into_result(self) -> Result<Option<T>, ErrorInfo> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl ErrorInfo {
    /// Create an error without a code
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error carrying a backend code
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Error for a call denied by the rate limiter
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(RATE_LIMIT_MESSAGE)
    }

    /// Error for an attempt that missed its deadline
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("Query timeout after {}ms", after.as_millis()))
    }

    /// Error for a call aborted through its cancellation token
    #[must_use]
    pub fn cancelled() -> Self {
        Self::with_code("Query cancelled", "499")
    }

    /// Whether another attempt could plausibly succeed
    ///
    /// Authentication failures and 4xx-style codes are caller faults and
    /// are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        if self.message.contains(AUTH_MARKER) {
            return false;
        }
        !self
            .code
            .as_deref()
            .is_some_and(|code| code.trim().starts_with('4'))
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ErrorInfo {}

fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCode {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(
        Option::<RawCode>::deserialize(deserializer)?.map(|raw| match raw {
            RawCode::Text(s) => s,
            RawCode::Integer(n) => n.to_string(),
            RawCode::Float(n) => n.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_outcome() {
        let outcome = QueryOutcome::success(vec!["NG", "GH"]);
        assert!(outcome.is_success());
        assert_eq!(outcome.clone().into_result().unwrap(), Some(vec!["NG", "GH"]));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_failure_outcome_has_no_data() {
        let outcome: QueryOutcome<u32> = QueryOutcome::failure(ErrorInfo::new("boom"));
        assert!(!outcome.is_success());
        assert!(outcome.data.is_none());
        assert_eq!(outcome.into_result().unwrap_err().message, "boom");
    }

    #[test]
    fn test_auth_errors_are_not_retryable() {
        assert!(!ErrorInfo::new("JWT auth token expired").is_retryable());
        assert!(!ErrorInfo::new("not authorized").is_retryable());
        // Matching is case-sensitive
        assert!(ErrorInfo::new("Authorization header missing").is_retryable());
    }

    #[test]
    fn test_client_codes_are_not_retryable() {
        assert!(!ErrorInfo::with_code("Not found", "404").is_retryable());
        assert!(!ErrorInfo::with_code("Bad request", "400").is_retryable());
        assert!(!ErrorInfo::with_code("Conflict", "409").is_retryable());
        assert!(!ErrorInfo::cancelled().is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ErrorInfo::new("network unreachable").is_retryable());
        assert!(ErrorInfo::with_code("Service unavailable", "503").is_retryable());
        assert!(ErrorInfo::with_code("Unique violation", "23505").is_retryable());
        assert!(ErrorInfo::timeout(Duration::from_millis(10)).is_retryable());
        assert!(ErrorInfo::rate_limited().is_retryable());
    }

    #[test]
    fn test_numeric_code_is_normalised() {
        let json = r#"{"data": null, "error": {"message": "Not found", "code": 404}}"#;
        let outcome: QueryOutcome<serde_json::Value> = serde_json::from_str(json).unwrap();
        let error = outcome.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("404"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_string_code_and_missing_fields() {
        let json = r#"{"error": {"message": "timeout", "code": "PGRST301"}}"#;
        let outcome: QueryOutcome<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(outcome.data.is_none());
        assert_eq!(outcome.error.unwrap().code.as_deref(), Some("PGRST301"));

        let json = r#"{"data": [1, 2, 3]}"#;
        let outcome: QueryOutcome<Vec<u8>> = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.data, Some(vec![1, 2, 3]));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let outcome: QueryOutcome<u8> = QueryOutcome::failure(ErrorInfo::rate_limited());
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "data": null,
                "error": {"message": RATE_LIMIT_MESSAGE}
            })
        );
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            ErrorInfo::with_code("Not found", "404").to_string(),
            "Not found (code 404)"
        );
        assert_eq!(ErrorInfo::new("plain").to_string(), "plain");
    }
}
