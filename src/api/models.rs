use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::{JobStatus, PaymentJob};

/// Response for a manually triggered payment
#[derive(Debug, Serialize)]
pub struct TriggerPaymentResponse {
    pub job_id: Uuid,
    pub job_key: String,
    pub status: JobStatus,
}

/// Job status as exposed over HTTP
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub job_key: String,
    pub subscription_id: Uuid,
    pub status: JobStatus,
    pub attempts_made: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentJob> for JobStatusResponse {
    fn from(job: PaymentJob) -> Self {
        Self {
            job_id: job.id,
            job_key: job.job_key,
            subscription_id: job.subscription_id,
            status: job.status,
            attempts_made: job.attempt,
            max_attempts: job.max_attempts,
            transaction_hash: job.result_tx_hash,
            error: job.last_error,
            error_category: job.error_category,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Query parameters for failed-payment listings
#[derive(Debug, Deserialize)]
pub struct FailedPaymentsQuery {
    pub limit: Option<i64>,
}

/// Query parameters for failed-payment statistics
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub user_address: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Health probe response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub queue: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
