//! Payment error categorization.
//!
//! Failures coming back from the settlement pipeline are free-form text from
//! several layers (facilitator, RPC, our own gates). Every failure is mapped
//! onto a fixed taxonomy carrying retryability and backoff hints; first
//! matching rule wins, so rule order matters.

use std::fmt;
use std::time::Duration;

/// Failure taxonomy for payment attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NetworkError,
    Timeout,
    RateLimit,
    InsufficientFunds,
    WalletError,
    InvalidSubscription,
    /// Generic retryable (server-side 5xx and similar)
    Retryable,
    /// Generic non-retryable (client-side 4xx and similar)
    NonRetryable,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::InsufficientFunds => "insufficient_funds",
            ErrorCategory::WalletError => "wallet_error",
            ErrorCategory::InvalidSubscription => "invalid_subscription",
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::NonRetryable => "non_retryable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "network_error" => Some(ErrorCategory::NetworkError),
            "timeout" => Some(ErrorCategory::Timeout),
            "rate_limit" => Some(ErrorCategory::RateLimit),
            "insufficient_funds" => Some(ErrorCategory::InsufficientFunds),
            "wallet_error" => Some(ErrorCategory::WalletError),
            "invalid_subscription" => Some(ErrorCategory::InvalidSubscription),
            "retryable" => Some(ErrorCategory::Retryable),
            "non_retryable" => Some(ErrorCategory::NonRetryable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw failure mapped onto the taxonomy
#[derive(Debug, Clone)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
}

impl CategorizedError {
    fn retryable(category: ErrorCategory, message: &str, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            category,
            message: message.to_string(),
            retryable: true,
            max_retries: Some(max_retries),
            base_delay: Some(base_delay),
        }
    }

    fn terminal(category: ErrorCategory, message: &str) -> Self {
        Self {
            category,
            message: message.to_string(),
            retryable: false,
            max_retries: None,
            base_delay: None,
        }
    }

    /// `"{category}: {message}"`, the form persisted on failed payment rows
    pub fn ledger_message(&self) -> String {
        format!("{}: {}", self.category, self.message)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Categorize a payment failure from its message text.
///
/// Pure function: identical input always yields an identical category,
/// retryable flag and retry hints. Matching is case-insensitive and the
/// first matching rule wins.
pub fn categorize_payment_error(message: &str) -> CategorizedError {
    let lower = message.to_lowercase();

    // Network / transport failures
    if contains_any(
        &lower,
        &["network", "connection", "econnrefused", "etimedout", "enotfound", "socket", "dns"],
    ) {
        return CategorizedError::retryable(
            ErrorCategory::NetworkError,
            message,
            5,
            Duration::from_secs(5),
        );
    }

    // Timeouts
    if contains_any(&lower, &["timeout", "timed out", "deadline exceeded"]) {
        return CategorizedError::retryable(
            ErrorCategory::Timeout,
            message,
            3,
            Duration::from_secs(10),
        );
    }

    // Rate limiting, retried with a much longer delay
    if contains_any(&lower, &["rate limit", "too many requests", "429"]) {
        return CategorizedError::retryable(
            ErrorCategory::RateLimit,
            message,
            3,
            Duration::from_secs(60),
        );
    }

    // Insufficient funds: user action needed, retrying cannot help
    if contains_any(&lower, &["insufficient", "balance", "funds", "not enough"]) {
        return CategorizedError::terminal(ErrorCategory::InsufficientFunds, message);
    }

    // Wallet / signing failures
    if contains_any(
        &lower,
        &["wallet", "signature", "private key", "authentication", "unauthorized"],
    ) {
        return CategorizedError::terminal(ErrorCategory::WalletError, message);
    }

    // Business-rule violations from the worker's own gates. Must be checked
    // before the generic 4xx rule: "subscription not found" contains
    // "not found".
    if contains_any(
        &lower,
        &[
            "subscription not found",
            "subscription is not active",
            "auto-pay is disabled",
            "payment is not due",
            "too many consecutive payment failures",
        ],
    ) {
        return CategorizedError::terminal(ErrorCategory::InvalidSubscription, message);
    }

    // Server errors (5xx)
    if contains_any(
        &lower,
        &["500", "502", "503", "504", "internal server error", "bad gateway", "service unavailable"],
    ) {
        return CategorizedError::retryable(
            ErrorCategory::Retryable,
            message,
            3,
            Duration::from_secs(5),
        );
    }

    // Client errors (4xx)
    if contains_any(
        &lower,
        &["400", "401", "403", "404", "bad request", "forbidden", "not found"],
    ) {
        return CategorizedError::terminal(ErrorCategory::NonRetryable, message);
    }

    // Unknown failure: retry conservatively
    CategorizedError::retryable(ErrorCategory::Retryable, message, 2, Duration::from_secs(5))
}

/// Whether another attempt should be made after `attempt_number` attempts
pub fn should_retry(error: &CategorizedError, attempt_number: u32) -> bool {
    if !error.retryable {
        return false;
    }
    match error.max_retries {
        Some(max) => attempt_number < max,
        None => true,
    }
}

/// Exponential backoff before jitter: `base * 2^(attempt-1)`
pub fn backoff_delay(base: Duration, attempt_number: u32) -> Duration {
    let exp = attempt_number.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

/// Retry delay with jitter applied: `base * 2^(attempt-1) * (1 + jitter)`,
/// jitter uniform in [0, 0.3)
pub fn calculate_retry_delay(error: &CategorizedError, attempt_number: u32) -> Duration {
    let base = error.base_delay.unwrap_or(Duration::from_secs(2));
    let delay = backoff_delay(base, attempt_number);
    let jitter: f64 = rand::random::<f64>() * 0.3;
    delay.mul_f64(1.0 + jitter)
}

/// Human-readable message per category. Raw remote error text is never shown
/// to end users, only logged alongside the category.
pub fn user_friendly_message(error: &CategorizedError) -> String {
    match error.category {
        ErrorCategory::InsufficientFunds => {
            "Insufficient funds. Please add funds to your wallet and try again.".to_string()
        }
        ErrorCategory::WalletError => {
            "Wallet authentication failed. Please reconnect your wallet.".to_string()
        }
        ErrorCategory::InvalidSubscription => "Subscription is not valid or active.".to_string(),
        ErrorCategory::NetworkError => {
            "Network error. Please check your connection and try again.".to_string()
        }
        ErrorCategory::Timeout => "Request timed out. Please try again.".to_string(),
        ErrorCategory::RateLimit => {
            "Too many requests. Please wait a moment and try again.".to_string()
        }
        _ => "An error occurred processing your payment.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_table() {
        let cases = [
            ("Connection refused by peer", ErrorCategory::NetworkError, true, Some(5)),
            ("DNS resolution failed", ErrorCategory::NetworkError, true, Some(5)),
            ("deadline exceeded while settling", ErrorCategory::Timeout, true, Some(3)),
            ("HTTP 429 Too Many Requests", ErrorCategory::RateLimit, true, Some(3)),
            ("insufficient token balance", ErrorCategory::InsufficientFunds, false, None),
            ("signature did not verify", ErrorCategory::WalletError, false, None),
            ("Subscription not found", ErrorCategory::InvalidSubscription, false, None),
            ("Payment is not due yet", ErrorCategory::InvalidSubscription, false, None),
            ("facilitator returned 503 Service Unavailable", ErrorCategory::Retryable, true, Some(3)),
            ("404 Not Found", ErrorCategory::NonRetryable, false, None),
            ("something entirely unexpected", ErrorCategory::Retryable, true, Some(2)),
        ];

        for (message, category, retryable, max_retries) in cases {
            let categorized = categorize_payment_error(message);
            assert_eq!(categorized.category, category, "message: {message}");
            assert_eq!(categorized.retryable, retryable, "message: {message}");
            assert_eq!(categorized.max_retries, max_retries, "message: {message}");
        }
    }

    #[test]
    fn test_matching_is_case_insensitive_and_deterministic() {
        let a = categorize_payment_error("RATE LIMIT exceeded");
        let b = categorize_payment_error("rate limit exceeded");
        assert_eq!(a.category, ErrorCategory::RateLimit);
        assert_eq!(a.category, b.category);
        assert_eq!(a.retryable, b.retryable);
        assert_eq!(a.max_retries, b.max_retries);
    }

    #[test]
    fn test_first_match_wins() {
        // "connection timeout" matches the network rule before the timeout rule
        let categorized = categorize_payment_error("connection timeout");
        assert_eq!(categorized.category, ErrorCategory::NetworkError);

        // Gate messages beat the generic 4xx "not found" keyword
        let categorized = categorize_payment_error("Subscription not found");
        assert_eq!(categorized.category, ErrorCategory::InvalidSubscription);
    }

    #[test]
    fn test_should_retry_respects_ceiling() {
        let error = categorize_payment_error("socket closed");
        assert!(should_retry(&error, 1));
        assert!(should_retry(&error, 4));
        assert!(!should_retry(&error, 5));

        let terminal = categorize_payment_error("insufficient funds");
        assert!(!should_retry(&terminal, 1));
    }

    #[test]
    fn test_backoff_is_monotonic_before_jitter() {
        let base = Duration::from_secs(2);
        let mut previous = Duration::ZERO;
        for attempt in 1..=6 {
            let delay = backoff_delay(base, attempt);
            assert!(delay >= previous, "attempt {attempt}");
            previous = delay;
        }
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 5), Duration::from_secs(32));
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        let error = categorize_payment_error("connection reset");
        for attempt in 1..=5 {
            let raw = backoff_delay(Duration::from_secs(5), attempt);
            let jittered = calculate_retry_delay(&error, attempt);
            assert!(jittered >= raw);
            assert!(jittered < raw.mul_f64(1.3));
        }
    }

    #[test]
    fn test_ledger_message_round_trip() {
        let categorized = categorize_payment_error("HTTP 429 Too Many Requests");
        let persisted = categorized.ledger_message();
        let (category, rest) = persisted.split_once(": ").unwrap();
        assert_eq!(ErrorCategory::parse(category), Some(ErrorCategory::RateLimit));
        assert_eq!(rest, "HTTP 429 Too Many Requests");
    }
}
