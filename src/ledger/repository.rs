use super::models::*;
use crate::error::{AppResult, PaymentError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Ledger repository - owns the subscription and payment-attempt tables.
///
/// The payments table is append-only; the only subscription columns this
/// repository writes are the payment dates, and only inside
/// `record_payment`.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========== SUBSCRIPTION READS ==========

    pub async fn get_subscription(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, service_id, user_address, cost, frequency, recipient_address,
                   is_active, auto_pay, last_payment_date, next_payment_date,
                   created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// All active, auto-pay subscriptions whose next payment is due,
    /// joined with their service name for the job payload snapshot
    pub async fn find_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<DueSubscription>> {
        let due = sqlx::query_as::<_, DueSubscription>(
            r#"
            SELECT s.id, s.user_address, s.cost, s.recipient_address,
                   COALESCE(sv.name, 'Unknown Service') AS service_name
            FROM subscriptions s
            LEFT JOIN services sv ON sv.id = s.service_id
            WHERE s.is_active = TRUE
              AND s.auto_pay = TRUE
              AND s.next_payment_date <= $1
            ORDER BY s.next_payment_date ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }

    // ========== PAYMENT LEDGER ==========

    /// Record a payment attempt.
    ///
    /// On a completed payment the ledger insert and the advancement of
    /// `last_payment_date`/`next_payment_date` happen in one transaction:
    /// both become visible or neither does. Failed attempts only append a
    /// ledger row; the due date never moves on failure.
    pub async fn record_payment(
        &self,
        subscription_id: Uuid,
        amount: Decimal,
        transaction_hash: &str,
        network: &str,
        status: PaymentStatus,
        error_message: Option<&str>,
    ) -> AppResult<Payment> {
        let subscription = self
            .get_subscription(subscription_id)
            .await?
            .ok_or(PaymentError::SubscriptionNotFound)?;

        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (subscription_id, amount, transaction_hash, network, status, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, subscription_id, amount, transaction_hash, network, status, error_message, timestamp
            "#,
        )
        .bind(subscription_id)
        .bind(amount)
        .bind(transaction_hash)
        .bind(network)
        .bind(status)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;

        if status == PaymentStatus::Completed {
            let now = Utc::now();
            let next_payment_date = subscription.frequency.advance(now);

            sqlx::query(
                r#"
                UPDATE subscriptions
                SET last_payment_date = $2, next_payment_date = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(subscription_id)
            .bind(now)
            .bind(next_payment_date)
            .execute(&mut *tx)
            .await?;

            info!(
                "💰 Payment recorded for subscription {}: {} (next due {})",
                subscription_id, amount, next_payment_date
            );
        }

        tx.commit().await?;

        Ok(payment)
    }

    /// Payment history for a subscription, newest first
    pub async fn get_payment_history(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, subscription_id, amount, transaction_hash, network, status, error_message, timestamp
            FROM payments
            WHERE subscription_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Readiness probe: cheap connectivity check
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
