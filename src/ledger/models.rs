use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Billing frequency of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "billing_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    /// Next payment date, advanced one billing period from `from`
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Weekly => from + chrono::Duration::days(7),
            Frequency::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or(from + chrono::Duration::days(30)),
            Frequency::Yearly => from
                .checked_add_months(Months::new(12))
                .unwrap_or(from + chrono::Duration::days(365)),
        }
    }
}

/// Payment attempt outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// Subscription entity. The pipeline only reads it and advances the payment
/// dates; everything else is owned by the external CRUD surface.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub service_id: Uuid,
    pub user_address: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub frequency: Frequency,
    pub recipient_address: String,

    pub is_active: bool,
    pub auto_pay: bool,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_payment_date: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_payment_date <= now
    }
}

/// A subscription joined with its service name, as returned by the due-payment
/// sweep query
#[derive(Debug, Clone, FromRow)]
pub struct DueSubscription {
    pub id: Uuid,
    pub user_address: String,
    pub cost: Decimal,
    pub recipient_address: String,
    pub service_name: String,
}

/// Payment ledger entry, one row per attempt. Append-only: history is
/// reconstructed by scanning rows, never by updating one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub transaction_hash: String,
    pub network: String,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn subscription(is_active: bool, auto_pay: bool, due_offset_days: i64) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            user_address: "0x1111111111111111111111111111111111111111".to_string(),
            cost: dec!(10.000),
            frequency: Frequency::Monthly,
            recipient_address: "0x2222222222222222222222222222222222222222".to_string(),
            is_active,
            auto_pay,
            last_payment_date: None,
            next_payment_date: now + chrono::Duration::days(due_offset_days),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_frequency_advance() {
        let from = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        assert_eq!(
            Frequency::Weekly.advance(from),
            Utc.with_ymd_and_hms(2024, 1, 22, 12, 0, 0).unwrap()
        );
        assert_eq!(
            Frequency::Monthly.advance(from),
            Utc.with_ymd_and_hms(2024, 2, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            Frequency::Yearly.advance(from),
            Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_monthly_advance_clamps_end_of_month() {
        // Jan 31 + 1 month lands on Feb 29 (2024 is a leap year)
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            Frequency::Monthly.advance(from),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(subscription(true, true, -1).is_due(now));
        assert!(!subscription(true, true, 3).is_due(now));
        // Exactly-now counts as due
        let mut sub = subscription(true, true, 0);
        sub.next_payment_date = now;
        assert!(sub.is_due(now));
    }
}
