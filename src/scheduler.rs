use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::error::AppResult;
use crate::ledger::models::DueSubscription;
use crate::ledger::LedgerRepository;
use crate::queue::{NewPaymentJob, PaymentJobStore};

/// Window in which an existing in-flight job suppresses re-enqueueing
const IN_FLIGHT_GUARD_SECS: i64 = 60;

/// Result of one scheduler sweep
#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub queued: usize,
    pub errors: Vec<String>,
}

/// Periodic sweep that finds due, auto-pay-enabled, active subscriptions and
/// enqueues one payment job each.
///
/// This component only decides that and what to pay. Execution is entirely
/// the worker's business, on the other side of the durable queue.
pub struct PaymentScheduler {
    ledger: Arc<LedgerRepository>,
    queue: Arc<PaymentJobStore>,
    sweep_interval: std::time::Duration,
}

impl PaymentScheduler {
    pub fn new(
        ledger: Arc<LedgerRepository>,
        queue: Arc<PaymentJobStore>,
        sweep_interval: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            queue,
            sweep_interval,
        }
    }

    /// One sweep over all due subscriptions. Individual enqueue failures are
    /// collected and never abort the rest of the sweep.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let now = Utc::now();
        let due = self.ledger.find_due_subscriptions(now).await?;

        info!("🔍 Found {} subscriptions with due payments", due.len());

        let mut queued = 0;
        let mut errors = Vec::new();

        for subscription in &due {
            match self.enqueue_due_payment(subscription).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => {
                    let message = format!(
                        "Failed to queue payment for subscription {}: {}",
                        subscription.id, e
                    );
                    error!("{}", message);
                    errors.push(message);
                }
            }
        }

        Ok(SweepReport {
            checked: due.len(),
            queued,
            errors,
        })
    }

    /// Enqueue one due payment unless an in-flight job already covers it.
    /// The guard protects against overlapping sweeps and slow enqueues; the
    /// worker's due-date re-check catches whatever slips through.
    async fn enqueue_due_payment(&self, subscription: &DueSubscription) -> AppResult<bool> {
        let recently_queued = self
            .queue
            .has_recent_job(subscription.id, Duration::seconds(IN_FLIGHT_GUARD_SECS))
            .await?;

        if recently_queued {
            info!(
                "⏭️  Skipping subscription {} - payment already in progress",
                subscription.id
            );
            return Ok(false);
        }

        self.queue
            .enqueue(NewPaymentJob {
                subscription_id: subscription.id,
                payer_address: subscription.user_address.clone(),
                amount: subscription.cost,
                recipient_address: subscription.recipient_address.clone(),
                service_name: subscription.service_name.clone(),
            })
            .await?;

        info!("📅 Queued payment for subscription {}", subscription.id);
        Ok(true)
    }

    /// Start the scheduler: one sweep immediately, then on a fixed interval
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "⏰ Payment scheduler started (sweeping every {:?})",
            self.sweep_interval
        );

        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);

            loop {
                // First tick fires immediately
                ticker.tick().await;

                match self.sweep().await {
                    Ok(report) => {
                        info!(
                            "✓ Sweep completed: checked={} queued={} errors={}",
                            report.checked,
                            report.queued,
                            report.errors.len()
                        );
                    }
                    Err(e) => error!("Scheduled payment sweep failed: {:?}", e),
                }
            }
        })
    }
}
