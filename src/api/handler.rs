use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    error::{AppError, AppResult, PaymentError},
    ledger::LedgerRepository,
    queue::{NewPaymentJob, PaymentJobStore},
    risk::tracker::{FailedPaymentRecord, FailedPaymentStats},
    risk::FailedPaymentTracker,
};

/// Shared application state. Every component is constructed once in
/// bootstrap and injected explicitly; there are no lazily initialized
/// singletons to health-check.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub queue: Arc<PaymentJobStore>,
    pub tracker: Arc<FailedPaymentTracker>,
}

/// Trigger an auto-pay attempt for one subscription
/// POST /api/v1/subscriptions/:id/trigger-payment
pub async fn trigger_payment(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<TriggerPaymentResponse>> {
    let subscription = state
        .ledger
        .get_subscription(subscription_id)
        .await?
        .ok_or(AppError::Payment(PaymentError::SubscriptionNotFound))?;

    if !subscription.is_active {
        return Err(PaymentError::SubscriptionInactive.into());
    }
    if !subscription.auto_pay {
        return Err(PaymentError::AutoPayDisabled.into());
    }

    let job = state
        .queue
        .enqueue(NewPaymentJob {
            subscription_id: subscription.id,
            payer_address: subscription.user_address.clone(),
            amount: subscription.cost,
            recipient_address: subscription.recipient_address.clone(),
            service_name: "Manual trigger".to_string(),
        })
        .await?;

    info!(
        "🔔 Manually triggered payment for subscription {} (job {})",
        subscription_id, job.job_key
    );

    Ok(Json(TriggerPaymentResponse {
        job_id: job.id,
        job_key: job.job_key,
        status: job.status,
    }))
}

/// Fetch one job's status
/// GET /api/v1/jobs/:job_id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = state
        .queue
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

    Ok(Json(job.into()))
}

/// All jobs for a subscription, newest first
/// GET /api/v1/jobs/subscription/:subscription_id
pub async fn get_subscription_jobs(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Vec<JobStatusResponse>>> {
    let jobs = state.queue.jobs_for_subscription(subscription_id).await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// Failed payments for a subscription
/// GET /api/v1/failed-payments/subscription/:subscription_id
pub async fn get_failed_payments(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Query(query): Query<FailedPaymentsQuery>,
) -> AppResult<Json<Vec<FailedPaymentRecord>>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let failures = state
        .tracker
        .get_failed_payments(subscription_id, limit)
        .await?;
    Ok(Json(failures))
}

/// Failed payment statistics, optionally filtered by user and date range
/// GET /api/v1/failed-payments/stats
pub async fn get_failed_payment_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<FailedPaymentStats>> {
    let stats = state
        .tracker
        .get_stats(
            query.user_address.as_deref(),
            query.start_date,
            query.end_date,
        )
        .await?;
    Ok(Json(stats))
}

/// Readiness probe
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    state.ledger.ping().await?;
    let queue_stats = state.queue.stats().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        queue: serde_json::to_value(queue_stats)
            .unwrap_or_else(|_| serde_json::Value::Null),
        timestamp: Utc::now(),
    }))
}
