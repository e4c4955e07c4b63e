use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

use super::errors::{categorize_payment_error, CategorizedError, ErrorCategory};
use crate::error::AppResult;
use crate::ledger::models::PaymentStatus;

/// A failed payment attempt, reconstructed from the ledger
#[derive(Debug, Clone, Serialize)]
pub struct FailedPaymentRecord {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub user_address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub error_category: String,
    pub error_message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate failure statistics
#[derive(Debug, Clone, Serialize)]
pub struct FailedPaymentStats {
    pub total: i64,
    pub by_category: HashMap<String, i64>,
    pub retryable: i64,
    pub non_retryable: i64,
    pub recent_failures: Vec<FailedPaymentRecord>,
}

/// Tracks failed payment attempts and evaluates the per-subscription
/// circuit breaker.
///
/// Failures live in the same append-only payments ledger as successes, with
/// the classified category prefixed onto `error_message`; this tracker is a
/// read-model over those rows plus the one write path used by the worker.
pub struct FailedPaymentTracker {
    pool: PgPool,
}

/// Circuit-breaker decision over the most recent `max_failures` failure
/// timestamps. Blocked only when there are at least `max_failures` of them
/// and no success landed after the earliest one, so a subscription that
/// recently succeeded is never blocked by failures predating the success.
pub fn blocked_by_consecutive_failures(
    recent_failures: &[DateTime<Utc>],
    last_success: Option<DateTime<Utc>>,
    max_failures: usize,
) -> bool {
    if recent_failures.len() < max_failures {
        return false;
    }
    let earliest = match recent_failures.iter().min() {
        Some(ts) => *ts,
        None => return false,
    };
    match last_success {
        Some(success) => success <= earliest,
        None => true,
    }
}

impl FailedPaymentTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a failed payment attempt: appends the one failed ledger row
    /// for this execution, with the classified category prefixed onto the
    /// message.
    ///
    /// Tracker writes are best-effort: a database error here is logged and
    /// swallowed so a broken bookkeeping path can never mask the original
    /// payment failure.
    pub async fn record_failure(
        &self,
        subscription_id: Uuid,
        amount: Decimal,
        network: &str,
        error: &CategorizedError,
        attempt_number: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (subscription_id, amount, transaction_hash, network, status, error_message)
            VALUES ($1, $2, '', $3, $4, $5)
            "#,
        )
        .bind(subscription_id)
        .bind(amount)
        .bind(network)
        .bind(PaymentStatus::Failed)
        .bind(error.ledger_message())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => info!(
                "📉 Recorded failure for subscription {}: category={} attempt={} retryable={} next_retry_at={:?}",
                subscription_id, error.category, attempt_number, error.retryable, next_retry_at
            ),
            Err(e) => error!("Failed to record payment failure: {:?}", e),
        }
    }

    /// Failed payments for a subscription, newest first
    pub async fn get_failed_payments(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<FailedPaymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.subscription_id, s.user_address, p.amount, p.error_message, p.timestamp
            FROM payments p
            JOIN subscriptions s ON s.id = p.subscription_id
            WHERE p.subscription_id = $1 AND p.status = $2
            ORDER BY p.timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(subscription_id)
        .bind(PaymentStatus::Failed)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }

    /// Aggregate failure statistics, optionally filtered by user and date range
    pub async fn get_stats(
        &self,
        user_address: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> AppResult<FailedPaymentStats> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.subscription_id, s.user_address, p.amount, p.error_message, p.timestamp
            FROM payments p
            JOIN subscriptions s ON s.id = p.subscription_id
            WHERE p.status = $1
              AND ($2::TEXT IS NULL OR s.user_address = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR p.timestamp >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR p.timestamp <= $4)
            ORDER BY p.timestamp DESC
            LIMIT 100
            "#,
        )
        .bind(PaymentStatus::Failed)
        .bind(user_address)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await?;

        let records: Vec<FailedPaymentRecord> = rows.iter().map(Self::record_from_row).collect();

        let mut by_category: HashMap<String, i64> = HashMap::new();
        let mut retryable = 0;
        let mut non_retryable = 0;

        for record in &records {
            *by_category.entry(record.error_category.clone()).or_insert(0) += 1;
            if record.retryable {
                retryable += 1;
            } else {
                non_retryable += 1;
            }
        }

        Ok(FailedPaymentStats {
            total: records.len() as i64,
            by_category,
            retryable,
            non_retryable,
            recent_failures: records.into_iter().take(10).collect(),
        })
    }

    /// Circuit breaker: has this subscription accumulated `max_failures`
    /// consecutive failures with no success since?
    pub async fn has_too_many_failures(
        &self,
        subscription_id: Uuid,
        max_failures: usize,
    ) -> AppResult<bool> {
        let failures: Vec<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT timestamp FROM payments
            WHERE subscription_id = $1 AND status = $2
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(subscription_id)
        .bind(PaymentStatus::Failed)
        .bind(max_failures as i64)
        .fetch_all(&self.pool)
        .await?;

        let last_success: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(timestamp) FROM payments
            WHERE subscription_id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(PaymentStatus::Completed)
        .fetch_one(&self.pool)
        .await?;

        Ok(blocked_by_consecutive_failures(
            &failures,
            last_success,
            max_failures,
        ))
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> FailedPaymentRecord {
        let error_message: Option<String> = row.get("error_message");
        let raw = error_message.unwrap_or_else(|| "Unknown error".to_string());

        // Rows are stored as "<category>: <message>"; rows predating the
        // classifier fall back to re-categorizing the raw text.
        let (category, message) = match raw.split_once(": ") {
            Some((prefix, rest)) if ErrorCategory::parse(prefix).is_some() => {
                (ErrorCategory::parse(prefix).unwrap(), rest.to_string())
            }
            _ => (categorize_payment_error(&raw).category, raw.clone()),
        };

        let retryable = categorize_payment_error(&raw).retryable
            && !matches!(
                category,
                ErrorCategory::NonRetryable
                    | ErrorCategory::InsufficientFunds
                    | ErrorCategory::WalletError
                    | ErrorCategory::InvalidSubscription
            );

        FailedPaymentRecord {
            id: row.get("id"),
            subscription_id: row.get("subscription_id"),
            user_address: row.get("user_address"),
            amount: row.get("amount"),
            error_category: category.as_str().to_string(),
            error_message: message,
            retryable,
            timestamp: row.get("timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes_ago: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes_ago)
    }

    #[test]
    fn test_blocked_after_three_failures_without_success() {
        let failures = vec![at(1), at(2), at(3)];
        assert!(blocked_by_consecutive_failures(&failures, None, 3));
    }

    #[test]
    fn test_not_blocked_below_threshold() {
        let failures = vec![at(1), at(2)];
        assert!(!blocked_by_consecutive_failures(&failures, None, 3));
    }

    #[test]
    fn test_success_after_failures_unblocks() {
        // Three failures, then a success newer than all of them
        let failures = vec![at(10), at(20), at(30)];
        assert!(!blocked_by_consecutive_failures(&failures, Some(at(5)), 3));
    }

    #[test]
    fn test_success_between_failures_unblocks() {
        // Success newer than the earliest of the window still unblocks: the
        // failures are not consecutive from the subscription's point of view
        let failures = vec![at(10), at(20), at(30)];
        assert!(!blocked_by_consecutive_failures(&failures, Some(at(25)), 3));
    }

    #[test]
    fn test_stale_success_does_not_unblock() {
        let failures = vec![at(10), at(20), at(30)];
        assert!(blocked_by_consecutive_failures(&failures, Some(at(45)), 3));
    }
}
