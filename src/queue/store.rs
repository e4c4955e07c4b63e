use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{job_key, JobStatus, NewPaymentJob, PaymentJob};
use crate::error::{AppError, AppResult};

/// Jobs an in-flight worker can hold before being considered stalled
pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 300;
/// Stall redeliveries before a job is terminally failed
pub const MAX_STALLED_COUNT: i32 = 2;
/// Completed jobs retained for inspection; older ones are pruned.
/// Failed jobs are retained indefinitely for audit.
pub const COMPLETED_JOBS_RETAINED: i64 = 100;

const JOB_COLUMNS: &str = "id, job_key, subscription_id, payer_address, amount, recipient_address, \
     service_name, status, attempt, max_attempts, run_at, lease_expires_at, stalled_count, \
     last_error, error_category, result_tx_hash, created_at, updated_at, completed_at";

/// Durable payment-job queue backed by Postgres.
///
/// At-least-once delivery: claiming uses `FOR UPDATE SKIP LOCKED` so
/// concurrent workers never double-claim, and expired leases are redelivered.
/// The queue, not the workers, is the source of truth for job ownership.
pub struct PaymentJobStore {
    pool: PgPool,
    job_timeout: Duration,
}

impl PaymentJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            job_timeout: Duration::seconds(DEFAULT_JOB_TIMEOUT_SECS),
        }
    }

    pub fn with_job_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            job_timeout: timeout,
        }
    }

    /// Enqueue a payment job. Idempotent per (subscription, enqueue instant):
    /// a duplicate enqueue within the same millisecond returns the existing
    /// job instead of inserting a second one.
    pub async fn enqueue(&self, new_job: NewPaymentJob) -> AppResult<PaymentJob> {
        let key = job_key(new_job.subscription_id, Utc::now());

        let inserted = sqlx::query_as::<_, PaymentJob>(&format!(
            r#"
            INSERT INTO payment_jobs (job_key, subscription_id, payer_address, amount, recipient_address, service_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_key) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(&key)
        .bind(new_job.subscription_id)
        .bind(&new_job.payer_address)
        .bind(new_job.amount)
        .bind(&new_job.recipient_address)
        .bind(&new_job.service_name)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(job) => {
                info!("📥 Job {} enqueued for subscription {}", job.job_key, job.subscription_id);
                Ok(job)
            }
            None => {
                warn!("Duplicate enqueue detected for key {}", key);
                self.get_by_key(&key)
                    .await?
                    .ok_or_else(|| AppError::Internal(format!("Job {key} vanished after conflict")))
            }
        }
    }

    pub async fn get(&self, job_id: Uuid) -> AppResult<Option<PaymentJob>> {
        let job = sqlx::query_as::<_, PaymentJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM payment_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn get_by_key(&self, key: &str) -> AppResult<Option<PaymentJob>> {
        let job = sqlx::query_as::<_, PaymentJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM payment_jobs WHERE job_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// All jobs for a subscription, newest first
    pub async fn jobs_for_subscription(&self, subscription_id: Uuid) -> AppResult<Vec<PaymentJob>> {
        let jobs = sqlx::query_as::<_, PaymentJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM payment_jobs
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Is there an in-flight (waiting or active) job for this subscription
    /// enqueued within the given window? The scheduler's duplicate guard.
    pub async fn has_recent_job(&self, subscription_id: Uuid, within: Duration) -> AppResult<bool> {
        let cutoff = Utc::now() - within;

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payment_jobs
                WHERE subscription_id = $1
                  AND status IN ('waiting', 'active')
                  AND created_at >= $2
            )
            "#,
        )
        .bind(subscription_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Claim up to `limit` ready jobs for execution. Claimed jobs become
    /// `active` with a lease; `attempt` is bumped to the attempt number now
    /// running.
    pub async fn claim_ready(&self, limit: i64) -> AppResult<Vec<PaymentJob>> {
        let lease_expires_at = Utc::now() + self.job_timeout;

        let jobs = sqlx::query_as::<_, PaymentJob>(&format!(
            r#"
            WITH claimable AS (
                SELECT id FROM payment_jobs
                WHERE status = 'waiting' AND run_at <= NOW()
                ORDER BY run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE payment_jobs
            SET status = 'active',
                attempt = attempt + 1,
                lease_expires_at = $2,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit)
        .bind(lease_expires_at)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Mark a job completed and prune old completed jobs beyond the
    /// retention bound
    pub async fn complete(&self, job_id: Uuid, transaction_hash: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_jobs
            SET status = $2, result_tx_hash = $3, lease_expires_at = NULL,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Completed)
        .bind(transaction_hash)
        .execute(&self.pool)
        .await?;

        info!("✅ Job {} completed", job_id);

        let pruned = sqlx::query(
            r#"
            DELETE FROM payment_jobs
            WHERE status = 'completed'
              AND id NOT IN (
                  SELECT id FROM payment_jobs
                  WHERE status = 'completed'
                  ORDER BY completed_at DESC NULLS LAST
                  LIMIT $1
              )
            "#,
        )
        .bind(COMPLETED_JOBS_RETAINED)
        .execute(&self.pool)
        .await?;

        if pruned.rows_affected() > 0 {
            info!("🗑️  Pruned {} old completed jobs", pruned.rows_affected());
        }

        Ok(())
    }

    /// Schedule a retry: back to `waiting` with a future `run_at`
    pub async fn retry(
        &self,
        job_id: Uuid,
        error: &str,
        category: &str,
        next_run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_jobs
            SET status = $2, run_at = $3, last_error = $4, error_category = $5,
                lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Waiting)
        .bind(next_run_at)
        .bind(error)
        .bind(category)
        .execute(&self.pool)
        .await?;

        info!("🔁 Job {} scheduled for retry at {}", job_id, next_run_at);
        Ok(())
    }

    /// Terminally fail a job. Failed jobs are never pruned.
    pub async fn fail(&self, job_id: Uuid, error: &str, category: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_jobs
            SET status = $2, last_error = $3, error_category = $4,
                lease_expires_at = NULL, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Failed)
        .bind(error)
        .bind(category)
        .execute(&self.pool)
        .await?;

        warn!("❌ Job {} terminally failed: {}", job_id, error);
        Ok(())
    }

    /// Redeliver jobs whose lease expired; jobs past the stall ceiling are
    /// terminally failed instead. Run periodically by the queue runner.
    pub async fn reclaim_stalled(&self) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        let exhausted = sqlx::query(
            r#"
            UPDATE payment_jobs
            SET status = 'failed',
                last_error = 'Job stalled: processing timed out repeatedly',
                error_category = 'timeout',
                lease_expires_at = NULL, completed_at = NOW(), updated_at = NOW()
            WHERE status = 'active' AND lease_expires_at < NOW() AND stalled_count >= $1
            "#,
        )
        .bind(MAX_STALLED_COUNT)
        .execute(&mut *tx)
        .await?;

        let redelivered = sqlx::query(
            r#"
            UPDATE payment_jobs
            SET status = 'waiting',
                stalled_count = stalled_count + 1,
                lease_expires_at = NULL, updated_at = NOW()
            WHERE status = 'active' AND lease_expires_at < NOW()
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if exhausted.rows_affected() > 0 || redelivered.rows_affected() > 0 {
            warn!(
                "⏰ Reclaimed {} stalled jobs ({} past the stall ceiling)",
                redelivered.rows_affected(),
                exhausted.rows_affected()
            );
        }

        Ok(redelivered.rows_affected())
    }

    /// Queue depth by status, for the readiness probe
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'waiting'),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM payment_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            waiting: row.0,
            active: row.1,
            completed: row.2,
            failed: row.3,
        })
    }
}

/// Job queue statistics
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}
