use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a payment job.
///
/// `waiting -> active -> {completed | failed}`; a retryable failure moves the
/// job back to `waiting` with a future `run_at` until the attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A durable auto-pay job. Created by the scheduler, mutated exclusively by
/// the queue store and the worker via the store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentJob {
    pub id: Uuid,
    pub job_key: String,
    pub subscription_id: Uuid,
    pub payer_address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub recipient_address: String,
    pub service_name: String,

    pub status: JobStatus,
    /// Attempts started so far; the current attempt number while active
    pub attempt: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,

    pub lease_expires_at: Option<DateTime<Utc>>,
    pub stalled_count: i32,

    pub last_error: Option<String>,
    pub error_category: Option<String>,
    pub result_tx_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload snapshot for a new payment job
#[derive(Debug, Clone)]
pub struct NewPaymentJob {
    pub subscription_id: Uuid,
    pub payer_address: String,
    pub amount: Decimal,
    pub recipient_address: String,
    pub service_name: String,
}

/// Derive the idempotent job key for a (subscription, enqueue instant) pair.
/// Two enqueue attempts within the same millisecond collide on purpose.
pub fn job_key(subscription_id: Uuid, enqueued_at: DateTime<Utc>) -> String {
    format!("autopay-{}-{}", subscription_id, enqueued_at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_is_stable_per_instant() {
        let id = Uuid::new_v4();
        let at = Utc::now();
        assert_eq!(job_key(id, at), job_key(id, at));
    }

    #[test]
    fn test_job_key_differs_across_subscriptions_and_instants() {
        let at = Utc::now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(job_key(a, at), job_key(b, at));
        assert_ne!(
            job_key(a, at),
            job_key(a, at + chrono::Duration::milliseconds(1))
        );
    }
}
