//! Compare-and-swap rules shared by the storage backends.
//!
//! Each function takes the currently stored row and the caller's intended state and
//! returns the row to write, or the error that rejects the write.

use crate::domain::order::{PaymentStatus, Transaction};
use crate::domain::subscription::Subscription;
use crate::error::{BillingError, Result};
use chrono::Utc;

/// Only the status of a transaction moves. The priced snapshot and idempotency key are
/// kept from the stored row, and a caller that tries to change them is rejected. Writing
/// the current status back onto a terminal row returns the stored row unchanged.
pub(crate) fn next_transaction(
    stored: Option<&Transaction>,
    next: &Transaction,
    expected_version: u32,
) -> Result<Transaction> {
    let stored = stored.ok_or(BillingError::NotFound("transaction"))?;
    if stored.version != expected_version {
        return Err(BillingError::Conflict("transaction"));
    }
    if !same_snapshot(stored, next) {
        return Err(BillingError::InvalidArgument(format!(
            "transaction {} cannot change its order, price or idempotency key",
            stored.id
        )));
    }
    if stored.status.is_terminal() {
        if next.status != stored.status {
            return Err(BillingError::InvalidTransition {
                from: stored.status,
                to: next.status,
            });
        }
        return Ok(stored.clone());
    }

    Ok(Transaction {
        status: next.status,
        updated_at: Utc::now(),
        version: stored.version + 1,
        ..stored.clone()
    })
}

fn same_snapshot(stored: &Transaction, next: &Transaction) -> bool {
    stored.id == next.id
        && stored.order_id == next.order_id
        && stored.idempotency_key == next.idempotency_key
        && stored.subtotal == next.subtotal
        && stored.charges == next.charges
        && stored.total == next.total
        && stored.currency == next.currency
}

/// The transaction must still be pending in storage and arrive marked completed.
pub(crate) fn completing_transaction(
    stored: Option<&Transaction>,
    completing: &Transaction,
) -> Result<Transaction> {
    if completing.status != PaymentStatus::Completed {
        return Err(BillingError::InvalidArgument(format!(
            "transaction {} must be completed, not {}",
            completing.id, completing.status
        )));
    }
    if let Some(stored) = stored
        && stored.version == completing.version
        && stored.status.is_terminal()
    {
        return Err(BillingError::InvalidTransition {
            from: stored.status,
            to: PaymentStatus::Completed,
        });
    }
    next_transaction(stored, completing, completing.version)
}

pub(crate) fn next_subscription(
    stored: Option<&Subscription>,
    next: &Subscription,
    expected_version: u32,
) -> Result<Subscription> {
    let stored = stored.ok_or(BillingError::NotFound("subscription"))?;
    if stored.version != expected_version {
        return Err(BillingError::Conflict("subscription"));
    }
    if stored.user_id != next.user_id {
        return Err(cross_user());
    }

    Ok(Subscription {
        id: stored.id,
        version: stored.version + 1,
        ..next.clone()
    })
}

/// The replaced subscription must still be the active one the caller saw.
pub(crate) fn replaced_subscription(
    stored: Option<&Subscription>,
    replaced: &Subscription,
    new: &Subscription,
) -> Result<Subscription> {
    if replaced.user_id != new.user_id {
        return Err(cross_user());
    }
    let current = next_subscription(stored, replaced, replaced.version)?;
    if stored.is_some_and(|s| !s.is_active()) {
        return Err(BillingError::Conflict("subscription"));
    }
    Ok(current)
}

fn cross_user() -> BillingError {
    BillingError::InvalidArgument("cannot transfer a subscription between users".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::plan::{Currency, NewPlan};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transaction() -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            Amount::new(dec!(10)).unwrap(),
            Currency::Usd,
            &[],
        )
        .unwrap()
    }

    fn subscription(user_id: u64) -> Subscription {
        let plan = NewPlan::new("Basic", "Basic plan", dec!(10), Currency::Usd, 30)
            .unwrap()
            .into_plan(1, 0);
        Subscription::new(user_id, &plan, Utc::now())
    }

    #[test]
    fn test_stale_transaction_version_conflicts() {
        let stored = transaction();
        let mut next = stored.clone();
        next.fail().unwrap();

        let written = next_transaction(Some(&stored), &next, 0).unwrap();
        assert_eq!(written.version, 1);
        assert_eq!(written.status, PaymentStatus::Failed);

        assert!(matches!(
            next_transaction(Some(&written), &next, 0),
            Err(BillingError::Conflict("transaction"))
        ));
        assert!(matches!(
            next_transaction(None, &next, 0),
            Err(BillingError::NotFound("transaction"))
        ));
    }

    #[test]
    fn test_terminal_transaction_cannot_change_status() {
        let mut stored = transaction();
        stored.complete().unwrap();
        let mut next = stored.clone();
        next.status = PaymentStatus::Failed;

        assert!(matches!(
            next_transaction(Some(&stored), &next, stored.version),
            Err(BillingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_priced_snapshot_cannot_be_rewritten() {
        let mut stored = transaction();
        stored.complete().unwrap();

        let mut repriced = stored.clone();
        repriced.total = dec!(1);
        let mut rekeyed = stored.clone();
        rekeyed.idempotency_key = Uuid::new_v4();
        for next in [repriced, rekeyed] {
            assert!(matches!(
                next_transaction(Some(&stored), &next, stored.version),
                Err(BillingError::InvalidArgument(_))
            ));
        }

        let pending = transaction();
        let mut cheaper = pending.clone();
        cheaper.total = dec!(1);
        cheaper.fail().unwrap();
        assert!(matches!(
            next_transaction(Some(&pending), &cheaper, 0),
            Err(BillingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_terminal_same_status_write_is_noop() {
        let mut stored = transaction();
        stored.complete().unwrap();
        let mut next = stored.clone();
        next.updated_at = Utc::now() + chrono::Duration::days(1);

        let written = next_transaction(Some(&stored), &next, stored.version).unwrap();
        assert_eq!(written, stored);
    }

    #[test]
    fn test_completing_an_already_completed_row_is_rejected() {
        let mut stored = transaction();
        stored.complete().unwrap();
        assert!(matches!(
            completing_transaction(Some(&stored), &stored),
            Err(BillingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_completing_requires_completed_status() {
        let stored = transaction();
        assert!(matches!(
            completing_transaction(Some(&stored), &stored),
            Err(BillingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_replaced_subscription_rules() {
        let active = subscription(1);
        let new = subscription(1);
        assert!(replaced_subscription(Some(&active), &active, &new).is_ok());

        let other_user = subscription(2);
        assert!(matches!(
            replaced_subscription(Some(&active), &active, &other_user),
            Err(BillingError::InvalidArgument(_))
        ));

        let mut paused = active.clone();
        paused.pause(Utc::now());
        assert!(matches!(
            replaced_subscription(Some(&paused), &active, &new),
            Err(BillingError::Conflict("subscription"))
        ));
    }
}
