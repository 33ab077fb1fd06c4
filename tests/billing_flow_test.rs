use billing_engine::domain::gateway::{
    GatewayTransactionStatus, PaymentGateway, compute_signature,
};
use billing_engine::domain::order::PaymentStatus;
use billing_engine::domain::plan::{Currency, DiscountScope, NewDiscount, NewPlan};
use billing_engine::domain::ports::{SubscriptionStore, TransactionLedger};
use billing_engine::domain::subscription::{Subscription, SubscriptionStatus};
use billing_engine::error::{BillingError, DiscountError, ErrorKind};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

mod common;

use common::{Harness, SERVER_KEY};

fn discount(code: &str, scope: DiscountScope, starts: i64, ends: i64) -> NewDiscount {
    let now = Utc::now();
    NewDiscount::new(
        code,
        "test discount",
        scope,
        dec!(10),
        now + Duration::days(starts),
        now + Duration::days(ends),
    )
    .unwrap()
}

#[tokio::test]
async fn test_checkout_total_with_discount_tax_and_fee() {
    let h = Harness::new().await;
    h.orchestrator
        .catalog()
        .create_discount(discount("WELCOME10", DiscountScope::All, -1, 1))
        .await
        .unwrap();

    let session = h
        .orchestrator
        .checkout(1, h.plan.id, Some("WELCOME10"))
        .await
        .unwrap();
    assert_eq!(session.total, dec!(102816));

    let tx = h.orchestrator.transaction(session.transaction_id).await.unwrap();
    assert_eq!(tx.subtotal.value(), dec!(100000));
    assert_eq!(tx.charges.discount, Some(dec!(10)));
    assert_eq!(tx.charges.tax, Some(dec!(12)));
    assert_eq!(tx.charges.fee, Some(dec!(2)));

    let fetched = h
        .gateway
        .settle(
            &session.transaction_id.to_string(),
            GatewayTransactionStatus::Pending,
            "",
        )
        .await
        .unwrap();
    assert_eq!(fetched.gross_amount, "102816.00");
}

#[tokio::test]
async fn test_settlement_creates_single_active_subscription() {
    let h = Harness::new().await;
    let tx_id = h.purchase(1, h.plan.id).await;

    let subs = h.orchestrator.subscriptions(1).await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].status, SubscriptionStatus::Active);
    assert_eq!(subs[0].plan_id, h.plan.id);

    let tx = h.orchestrator.transaction(tx_id).await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Completed);

    // redelivery of the same settlement
    let notification = h.gateway.fetch_status(&tx_id.to_string()).await.unwrap();
    h.orchestrator
        .handle_webhook(&serde_json::to_vec(&notification).unwrap())
        .await
        .unwrap();
    h.orchestrator.finalize(tx_id).await.unwrap();

    assert_eq!(h.orchestrator.subscriptions(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_purchase_pauses_live_subscription() {
    let h = Harness::new().await;
    let now = Utc::now();

    // an active term that ends in 10 days
    let seeded = h
        .store
        .create_order_and_transaction(1, h.plan.id, h.plan.currency, h.plan.price, &[])
        .await
        .unwrap();
    let mut completing = seeded.clone();
    completing.complete().unwrap();
    let current = Subscription::new(1, &h.plan, now - Duration::days(20));
    SubscriptionStore::create(&h.store, &current, &completing)
        .await
        .unwrap();

    h.purchase(1, h.plan.id).await;

    let subs = h.orchestrator.subscriptions(1).await.unwrap();
    assert_eq!(subs.len(), 2);
    let paused = subs.iter().find(|s| s.id == current.id).unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert_eq!(paused.remaining_days, Some(10));
    assert!(paused.paused_at.is_some());

    let active = subs.iter().find(|s| s.id != current.id).unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(active.start_date >= now);
    assert_eq!(active.end_date - active.start_date, Duration::days(30));
}

#[tokio::test]
async fn test_purchase_after_lapse_expires_old_subscription() {
    let h = Harness::new().await;
    let seeded = h
        .store
        .create_order_and_transaction(1, h.plan.id, h.plan.currency, h.plan.price, &[])
        .await
        .unwrap();
    let mut completing = seeded.clone();
    completing.complete().unwrap();
    let lapsed = Subscription::new(1, &h.plan, Utc::now() - Duration::days(45));
    SubscriptionStore::create(&h.store, &lapsed, &completing)
        .await
        .unwrap();

    h.purchase(1, h.plan.id).await;

    let subs = h.orchestrator.subscriptions(1).await.unwrap();
    let old = subs.iter().find(|s| s.id == lapsed.id).unwrap();
    assert_eq!(old.status, SubscriptionStatus::Expired);
    assert_eq!(
        subs.iter().filter(|s| s.status == SubscriptionStatus::Active).count(),
        1
    );
}

#[tokio::test]
async fn test_expire_if_lapsed() {
    let h = Harness::new().await;
    let seeded = h
        .store
        .create_order_and_transaction(3, h.plan.id, h.plan.currency, h.plan.price, &[])
        .await
        .unwrap();
    let mut completing = seeded.clone();
    completing.complete().unwrap();
    let lapsed = Subscription::new(3, &h.plan, Utc::now() - Duration::days(31));
    SubscriptionStore::create(&h.store, &lapsed, &completing)
        .await
        .unwrap();

    let expired = h.orchestrator.expire_if_lapsed(3).await.unwrap().unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);
    assert_eq!(expired.version, lapsed.version + 1);
    assert_eq!(h.orchestrator.expire_if_lapsed(3).await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_discount_reports_expired() {
    let h = Harness::new().await;
    h.orchestrator
        .catalog()
        .create_discount(discount("OLD", DiscountScope::All, -30, -1))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .checkout(1, h.plan.id, Some("OLD"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Discount(DiscountError::Expired)));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(h.ledger.creates(), 0);
    assert_eq!(h.gateway.checkout_count().await, 0);
}

#[tokio::test]
async fn test_unattached_plan_discount_writes_nothing() {
    let h = Harness::new().await;
    h.orchestrator
        .catalog()
        .create_discount(discount("VIP", DiscountScope::Plan, -1, 1))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .checkout(1, h.plan.id, Some("VIP"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Discount(DiscountError::Invalid)));
    assert_eq!(h.ledger.creates(), 0);
    assert_eq!(h.gateway.checkout_count().await, 0);
}

#[tokio::test]
async fn test_unknown_plan_is_not_found() {
    let h = Harness::new().await;
    let err = h.orchestrator.checkout(1, 404, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.ledger.creates(), 0);
}

#[tokio::test]
async fn test_unpriceable_plan_is_rejected_at_checkout() {
    let h = Harness::new().await;
    let huge = h
        .orchestrator
        .catalog()
        .create_plan(NewPlan::new("Huge", "huge plan", dec!(1e28), Currency::Idr, 30).unwrap())
        .await
        .unwrap();

    let err = h.orchestrator.checkout(1, huge.id, None).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidAmount(_)));
    assert_eq!(h.gateway.checkout_count().await, 0);
}

#[tokio::test]
async fn test_forged_amount_is_rejected_without_mutation() {
    let h = Harness::new().await;
    let session = h.orchestrator.checkout(1, h.plan.id, None).await.unwrap();
    let mut forged = h
        .settle(
            session.transaction_id,
            GatewayTransactionStatus::Settlement,
            "accept",
        )
        .await;
    forged.gross_amount = "1.00".to_string();
    forged.signature_key = compute_signature(
        &forged.order_id,
        &forged.status_code,
        &forged.gross_amount,
        SERVER_KEY,
    );

    let err = h
        .orchestrator
        .handle_webhook(&serde_json::to_vec(&forged).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PayloadMismatch("gross_amount")));

    let tx = h.orchestrator.transaction(session.transaction_id).await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Pending);
    assert_eq!(tx.version, 0);
    assert!(h.orchestrator.subscriptions(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized() {
    let h = Harness::new().await;
    let session = h.orchestrator.checkout(1, h.plan.id, None).await.unwrap();
    let mut forged = h
        .settle(
            session.transaction_id,
            GatewayTransactionStatus::Settlement,
            "accept",
        )
        .await;
    forged.signature_key = compute_signature(
        &forged.order_id,
        &forged.status_code,
        &forged.gross_amount,
        "wrong-key",
    );

    let err = h
        .orchestrator
        .handle_webhook(&serde_json::to_vec(&forged).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(h.orchestrator.subscriptions(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_payment_cancels_transaction() {
    let h = Harness::new().await;
    let session = h.orchestrator.checkout(1, h.plan.id, None).await.unwrap();
    let notification = h
        .settle(session.transaction_id, GatewayTransactionStatus::Deny, "")
        .await;

    let status = h
        .orchestrator
        .handle_webhook(&serde_json::to_vec(&notification).unwrap())
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Failed);

    let tx = h.orchestrator.transaction(session.transaction_id).await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Failed);
    assert!(h.orchestrator.subscriptions(1).await.unwrap().is_empty());

    let err = h
        .orchestrator
        .finalize(session.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_challenged_capture_fails() {
    let h = Harness::new().await;
    let session = h.orchestrator.checkout(1, h.plan.id, None).await.unwrap();
    let notification = h
        .settle(
            session.transaction_id,
            GatewayTransactionStatus::Capture,
            "challenge",
        )
        .await;

    let status = h
        .orchestrator
        .handle_webhook(&serde_json::to_vec(&notification).unwrap())
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_malformed_webhook_is_invalid_argument() {
    let h = Harness::new().await;
    let err = h.orchestrator.handle_webhook(b"not json").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
