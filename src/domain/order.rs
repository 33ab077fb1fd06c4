use crate::domain::money::{Amount, ApplyOption, Charges};
use crate::domain::plan::Currency;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(BillingError::InvalidArgument(format!(
                "invalid payment status: {other}"
            ))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        })
    }
}

/// A user's intent to buy a plan. Never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: u64,
    pub plan_id: u64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(user_id: u64, plan_id: u64) -> Result<Self> {
        if user_id == 0 {
            return Err(BillingError::InvalidArgument(
                "user id cannot be empty".to_string(),
            ));
        }
        if plan_id == 0 {
            return Err(BillingError::InvalidArgument(
                "plan id cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            created_at: Utc::now(),
        })
    }
}

/// The financial record for one [`Order`].
///
/// Prices are snapshots taken at checkout, so later plan edits never change what a
/// transaction charged. The idempotency key is generated once and reused on every
/// gateway call for this transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub idempotency_key: Uuid,
    pub subtotal: Amount,
    pub charges: Charges,
    pub total: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl Transaction {
    /// Prices a new pending transaction for `order_id`.
    pub fn new(
        order_id: Uuid,
        subtotal: Amount,
        currency: Currency,
        options: &[ApplyOption],
    ) -> Result<Self> {
        let charges = Charges::from_options(options);
        let breakdown = charges.breakdown(subtotal)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            idempotency_key: Uuid::new_v4(),
            subtotal,
            charges,
            total: breakdown.total,
            currency,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(PaymentStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(PaymentStatus::Failed)
    }

    fn transition(&mut self, to: PaymentStatus) -> Result<()> {
        if self.status != PaymentStatus::Pending {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending() -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            Amount::new(dec!(100000)).unwrap(),
            Currency::Idr,
            &[
                ApplyOption::Discount(dec!(10)),
                ApplyOption::Tax(dec!(12)),
                ApplyOption::Fee(dec!(2)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_transaction_is_priced_and_pending() {
        let tx = pending();
        assert_eq!(tx.total, dec!(102816));
        assert_eq!(tx.status, PaymentStatus::Pending);
        assert_eq!(tx.charges.discount, Some(dec!(10)));
        assert_eq!(tx.version, 0);
        assert_ne!(tx.id, tx.idempotency_key);
    }

    #[test]
    fn test_invalid_charges_reject_transaction() {
        let result = Transaction::new(
            Uuid::new_v4(),
            Amount::new(dec!(10)).unwrap(),
            Currency::Usd,
            &[ApplyOption::Fee(dec!(-1))],
        );
        assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut tx = pending();
        tx.complete().unwrap();
        assert!(tx.is_completed());
        assert!(matches!(
            tx.fail(),
            Err(BillingError::InvalidTransition {
                from: PaymentStatus::Completed,
                to: PaymentStatus::Failed
            })
        ));

        let mut tx = pending();
        tx.fail().unwrap();
        assert!(tx.complete().is_err());
        assert!(tx.status.is_terminal());
    }

    #[test]
    fn test_order_requires_ids() {
        assert!(Order::new(0, 1).is_err());
        assert!(Order::new(1, 0).is_err());
        assert!(Order::new(1, 1).is_ok());
    }

    #[test]
    fn test_payment_status_round_trips_through_str() {
        assert_eq!(
            "COMPLETED".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Completed
        );
        assert!("DONE".parse::<PaymentStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }
}
