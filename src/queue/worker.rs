use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::models::PaymentJob;
use crate::error::{AppResult, PaymentError};
use crate::ledger::models::PaymentStatus;
use crate::ledger::LedgerRepository;
use crate::risk::errors::{
    calculate_retry_delay, categorize_payment_error, should_retry, user_friendly_message,
    ErrorCategory,
};
use crate::risk::FailedPaymentTracker;
use crate::x402::types::{PaymentRequirements, SettleEvent};
use crate::x402::{SigningAccount, X402PaymentService};

/// Consecutive failures after which the circuit breaker trips
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;
/// Validity window requested for each transfer authorization
const PAYMENT_TIMEOUT_SECS: u64 = 300;

/// Explicit result of one payment attempt, inspected by the queue runner.
/// Retry scheduling is data, not control flow.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        transaction_hash: String,
    },
    Retry {
        error: String,
        category: ErrorCategory,
        delay: Duration,
    },
    Failed {
        error: String,
        category: ErrorCategory,
        user_message: String,
    },
}

/// Executes payment jobs pulled from the durable queue.
///
/// Concurrency is the queue runner's responsibility via its slot count; the
/// worker itself processes one job per call.
pub struct PaymentWorker {
    ledger: Arc<LedgerRepository>,
    tracker: Arc<FailedPaymentTracker>,
    x402: Arc<X402PaymentService>,
    signer: Arc<dyn SigningAccount>,
    network: String,
    payment_asset: String,
    asset_decimals: u32,
}

impl PaymentWorker {
    pub fn new(
        ledger: Arc<LedgerRepository>,
        tracker: Arc<FailedPaymentTracker>,
        x402: Arc<X402PaymentService>,
        signer: Arc<dyn SigningAccount>,
        network: String,
        payment_asset: String,
        asset_decimals: u32,
    ) -> Self {
        Self {
            ledger,
            tracker,
            x402,
            signer,
            network,
            payment_asset,
            asset_decimals,
        }
    }

    /// Process one payment job to an explicit outcome
    pub async fn process(&self, job: &PaymentJob) -> JobOutcome {
        info!(
            "⚙️ Processing job {} for subscription {} (attempt {})",
            job.job_key, job.subscription_id, job.attempt
        );

        match self.execute(job).await {
            Ok(transaction_hash) => {
                info!(
                    "✅ Payment settled for subscription {} (tx: {})",
                    job.subscription_id, transaction_hash
                );
                JobOutcome::Completed { transaction_hash }
            }
            Err(err) => self.handle_failure(job, &err.to_string()).await,
        }
    }

    /// The payment attempt itself. Every step is a hard gate; the error
    /// message decides retryability downstream.
    async fn execute(&self, job: &PaymentJob) -> AppResult<String> {
        let now = Utc::now();

        // Gate 1: the job payload is only a snapshot. Re-fetch and
        // re-validate; state may have changed between scheduling and now.
        let subscription = self
            .ledger
            .get_subscription(job.subscription_id)
            .await?
            .ok_or(PaymentError::SubscriptionNotFound)?;

        if !subscription.is_active {
            return Err(PaymentError::SubscriptionInactive.into());
        }
        if !subscription.auto_pay {
            return Err(PaymentError::AutoPayDisabled.into());
        }

        // Gate 2: circuit breaker. A chronically failing subscription needs
        // the user, not another retry.
        if self
            .tracker
            .has_too_many_failures(subscription.id, MAX_CONSECUTIVE_FAILURES)
            .await?
        {
            return Err(PaymentError::TooManyFailures.into());
        }

        // Gate 3: due-date re-check. Makes the loser of a duplicate-job race
        // a no-op instead of a double charge.
        if !subscription.is_due(now) {
            return Err(PaymentError::NotDue.into());
        }

        // Amount and recipient come from the fresh subscription row, not the
        // job payload.
        let value = crate::x402::types::to_atomic_units(subscription.cost, self.asset_decimals)?;
        let requirements = PaymentRequirements {
            scheme: "exact".to_string(),
            network: self.network.clone(),
            pay_to: subscription.recipient_address.clone(),
            asset: self.payment_asset.clone(),
            max_amount_required: value.to_string(),
            max_timeout_seconds: PAYMENT_TIMEOUT_SECS,
            description: Some(format!("Auto-pay for {}", job.service_name)),
            mime_type: None,
        };

        info!(
            "💸 Attempting payment for subscription {}: {} to {}",
            subscription.id, subscription.cost, subscription.recipient_address
        );

        let outcome = self.x402.pay(self.signer.as_ref(), &requirements).await?;

        match outcome.event {
            SettleEvent::Settled => {
                let transaction_hash = outcome.tx_hash.ok_or_else(|| {
                    PaymentError::SettlementFailed("settled without a transaction hash".to_string())
                })?;

                // Ledger row and due-date advancement commit together
                self.ledger
                    .record_payment(
                        subscription.id,
                        subscription.cost,
                        &transaction_hash,
                        &self.network,
                        PaymentStatus::Completed,
                        None,
                    )
                    .await?;

                Ok(transaction_hash)
            }
            SettleEvent::Failed => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "Payment processing failed".to_string());
                Err(PaymentError::SettlementFailed(reason).into())
            }
        }
    }

    /// Classify a failed attempt, record it, and decide between retry and
    /// terminal failure
    async fn handle_failure(&self, job: &PaymentJob, message: &str) -> JobOutcome {
        let categorized = categorize_payment_error(message);
        let attempt_number = job.attempt.max(1) as u32;

        let retry = retry_allowed(&categorized, attempt_number, job.max_attempts as u32);

        let delay = calculate_retry_delay(&categorized, attempt_number);
        let next_retry_at = if retry {
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(2)))
        } else {
            None
        };

        self.tracker
            .record_failure(
                job.subscription_id,
                job.amount,
                &self.network,
                &categorized,
                attempt_number,
                next_retry_at,
            )
            .await;

        if retry {
            warn!(
                "⚠️ Payment failed (retryable, attempt {}/{}): {} - retrying in {:?}",
                attempt_number, job.max_attempts, categorized.message, delay
            );
            JobOutcome::Retry {
                error: categorized.ledger_message(),
                category: categorized.category,
                delay,
            }
        } else {
            let user_message = user_friendly_message(&categorized);
            error!(
                "❌ Payment failed (non-retryable): {} [{}]",
                categorized.message, categorized.category
            );
            JobOutcome::Failed {
                error: categorized.ledger_message(),
                category: categorized.category,
                user_message,
            }
        }
    }
}

/// Another delivery is warranted only when the category is retryable and
/// neither the category's ceiling nor the job's own attempt ceiling has been
/// reached
fn retry_allowed(
    categorized: &crate::risk::errors::CategorizedError,
    attempt_number: u32,
    max_attempts: u32,
) -> bool {
    categorized.retryable
        && should_retry(categorized, attempt_number)
        && attempt_number < max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_terminates_after_one_attempt() {
        let categorized = categorize_payment_error("insufficient funds for transfer");
        assert!(!retry_allowed(&categorized, 1, 5));
    }

    #[test]
    fn test_network_error_retries_until_category_ceiling() {
        let categorized = categorize_payment_error("connection reset by peer");
        assert!(retry_allowed(&categorized, 1, 5));
        assert!(retry_allowed(&categorized, 4, 5));
        // Category allows 5 attempts; the 5th is the last
        assert!(!retry_allowed(&categorized, 5, 5));
    }

    #[test]
    fn test_job_ceiling_wins_over_category_ceiling() {
        // NETWORK_ERROR allows 5 attempts, but a job capped at 3 stops at 3
        let categorized = categorize_payment_error("socket closed unexpectedly");
        assert!(retry_allowed(&categorized, 2, 3));
        assert!(!retry_allowed(&categorized, 3, 3));
    }

    #[test]
    fn test_gate_violations_never_redeliver() {
        for message in [
            "Subscription not found",
            "Subscription is not active",
            "Auto-pay is disabled for this subscription",
            "Payment is not due yet",
            "Too many consecutive payment failures. Please check your subscription and payment method.",
        ] {
            let categorized = categorize_payment_error(message);
            assert!(
                !retry_allowed(&categorized, 1, 5),
                "expected terminal: {message}"
            );
        }
    }
}
