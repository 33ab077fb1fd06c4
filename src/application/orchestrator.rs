use crate::application::catalog::Catalog;
use crate::application::webhook::WebhookVerifier;
use crate::config::EngineConfig;
use crate::domain::gateway::{CheckoutRequest, LineItem, PaymentNotification, SharedGateway};
use crate::domain::order::{PaymentStatus, Transaction};
use crate::domain::plan::Plan;
use crate::domain::ports::{
    DiscountRepository, PlanRepository, SubscriptionStore, SubscriptionStoreBox,
    TransactionLedger, TransactionLedgerBox,
};
use crate::domain::subscription::Subscription;
use crate::error::{BillingError, DiscountError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// What a caller needs to send the customer to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSession {
    pub transaction_id: Uuid,
    pub order_id: Uuid,
    pub idempotency_key: Uuid,
    pub total: Decimal,
    pub payment_url: String,
}

/// Drives a purchase from checkout to an active subscription.
///
/// The orchestrator holds no mutable state of its own. Every write goes through a single
/// store operation guarded by the version the orchestrator loaded, so concurrent callers
/// racing on the same user or transaction get a `Conflict` instead of corrupting state.
pub struct Orchestrator {
    catalog: Catalog,
    ledger: TransactionLedgerBox,
    subscriptions: SubscriptionStoreBox,
    verifier: WebhookVerifier,
    gateway: SharedGateway,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        catalog: Catalog,
        ledger: TransactionLedgerBox,
        subscriptions: SubscriptionStoreBox,
        gateway: SharedGateway,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            ledger,
            subscriptions,
            verifier: WebhookVerifier::new(gateway.clone(), config.gateway_timeout),
            gateway,
            config,
        })
    }

    /// Wires every port to one store backend.
    pub fn with_store<S>(store: S, gateway: SharedGateway, config: EngineConfig) -> Result<Self>
    where
        S: PlanRepository
            + DiscountRepository
            + TransactionLedger
            + SubscriptionStore
            + Clone
            + 'static,
    {
        let catalog = Catalog::new(Box::new(store.clone()), Box::new(store.clone()));
        Self::new(
            catalog,
            Box::new(store.clone()),
            Box::new(store),
            gateway,
            config,
        )
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Prices a plan for `user_id`, records the order and its pending transaction, and
    /// opens a gateway checkout for it.
    ///
    /// An empty code means no discount. Any other discount failure aborts the checkout
    /// before anything is written.
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        user_id: u64,
        plan_id: u64,
        discount_code: Option<&str>,
    ) -> Result<CheckoutSession> {
        let plan = self.catalog.get_plan(plan_id).await?;
        let discount = match discount_code {
            None => None,
            Some(code) => match self.catalog.get_discount(code, plan.id).await {
                Ok(discount) => Some(discount.percentage),
                Err(BillingError::Discount(DiscountError::EmptyCode)) => None,
                Err(e) => return Err(e),
            },
        };

        let transaction = self
            .ledger
            .create_order_and_transaction(
                user_id,
                plan.id,
                plan.currency,
                plan.price,
                &self.config.options(discount),
            )
            .await?;
        info!(
            transaction_id = %transaction.id,
            total = %transaction.total,
            "transaction created"
        );

        let payment_url = self.open_checkout(&transaction, &plan).await?;
        Ok(CheckoutSession {
            transaction_id: transaction.id,
            order_id: transaction.order_id,
            idempotency_key: transaction.idempotency_key,
            total: transaction.total,
            payment_url,
        })
    }

    /// Re-opens the gateway checkout of a pending transaction with its original
    /// idempotency key, e.g. after the first attempt timed out.
    #[instrument(skip(self))]
    pub async fn resume_checkout(&self, transaction_id: Uuid) -> Result<CheckoutSession> {
        let (transaction, order) = self
            .ledger
            .get_transaction_and_order(transaction_id)
            .await?
            .ok_or(BillingError::NotFound("transaction"))?;
        if transaction.status != PaymentStatus::Pending {
            return Err(BillingError::InvalidTransition {
                from: transaction.status,
                to: PaymentStatus::Pending,
            });
        }

        let plan = self.catalog.get_plan(order.plan_id).await?;
        let payment_url = self.open_checkout(&transaction, &plan).await?;
        Ok(CheckoutSession {
            transaction_id: transaction.id,
            order_id: order.id,
            idempotency_key: transaction.idempotency_key,
            total: transaction.total,
            payment_url,
        })
    }

    /// Authenticates a gateway notification and applies the payment status it confirms.
    #[instrument(skip_all)]
    pub async fn handle_webhook(&self, payload: &[u8]) -> Result<PaymentStatus> {
        let notification = PaymentNotification::from_slice(payload)?;
        let status = self.verifier.verify(&notification).await?;
        let transaction_id = Uuid::parse_str(&notification.order_id).map_err(|e| {
            BillingError::InvalidArgument(format!(
                "invalid order id {}: {e}",
                notification.order_id
            ))
        })?;

        match status {
            PaymentStatus::Pending => {
                debug!(%transaction_id, "payment still pending");
            }
            PaymentStatus::Completed => self.finalize(transaction_id).await?,
            PaymentStatus::Failed => self.cancel(transaction_id).await?,
        }
        Ok(status)
    }

    /// Completes a paid transaction and gives the user the plan they bought.
    ///
    /// A live subscription is paused and keeps its remaining days, a lapsed one is
    /// expired. Either way the replacement is written in the same unit as the
    /// transaction's completion. Finalizing an already completed transaction does
    /// nothing.
    #[instrument(skip(self))]
    pub async fn finalize(&self, transaction_id: Uuid) -> Result<()> {
        let (mut transaction, order) = self
            .ledger
            .get_transaction_and_order(transaction_id)
            .await?
            .ok_or(BillingError::NotFound("transaction"))?;
        if transaction.is_completed() {
            debug!(%transaction_id, "transaction already completed");
            return Ok(());
        }
        transaction.complete()?;

        let plan = self.catalog.get_plan(order.plan_id).await?;
        let now = Utc::now();
        let subscription = Subscription::new(order.user_id, &plan, now);

        match self.subscriptions.get_active(order.user_id).await? {
            Some(active) if active.is_expired(now) => {
                self.subscriptions
                    .expire_and_create(&active, &subscription, &transaction)
                    .await?;
                info!(
                    user_id = order.user_id,
                    expired = %active.id,
                    "lapsed subscription expired"
                );
            }
            Some(active) => {
                let paused = self
                    .subscriptions
                    .pause_and_create(&active, &subscription, &transaction)
                    .await?;
                info!(
                    user_id = order.user_id,
                    paused = %paused.id,
                    remaining_days = ?paused.remaining_days,
                    "active subscription paused"
                );
            }
            None => {
                self.subscriptions
                    .create(&subscription, &transaction)
                    .await?;
            }
        }

        info!(
            user_id = order.user_id,
            plan_id = plan.id,
            subscription_id = %subscription.id,
            "subscription activated"
        );
        Ok(())
    }

    /// Marks a pending transaction failed. Cancelling an already failed transaction does
    /// nothing.
    #[instrument(skip(self))]
    pub async fn cancel(&self, transaction_id: Uuid) -> Result<()> {
        let mut transaction = self
            .ledger
            .get_transaction(transaction_id)
            .await?
            .ok_or(BillingError::NotFound("transaction"))?;
        if transaction.status == PaymentStatus::Failed {
            debug!(%transaction_id, "transaction already failed");
            return Ok(());
        }

        transaction.fail()?;
        self.ledger
            .update_transaction(transaction.id, &transaction, transaction.version)
            .await?;
        info!(%transaction_id, status = %transaction.status, "transaction cancelled");
        Ok(())
    }

    /// Expires the user's active subscription if its term has ended.
    #[instrument(skip(self))]
    pub async fn expire_if_lapsed(&self, user_id: u64) -> Result<Option<Subscription>> {
        let now = Utc::now();
        let Some(active) = self.subscriptions.get_active(user_id).await? else {
            return Ok(None);
        };
        if !active.is_expired(now) {
            return Ok(None);
        }

        let mut expired = active.clone();
        expired.expire();
        let expired = self
            .subscriptions
            .update(active.id, &expired, active.version)
            .await?;
        info!(user_id, subscription_id = %expired.id, "subscription expired");
        Ok(Some(expired))
    }

    /// Every subscription the user ever held, oldest first.
    pub async fn subscriptions(&self, user_id: u64) -> Result<Vec<Subscription>> {
        self.subscriptions.get_all(user_id).await
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.ledger
            .get_transaction(transaction_id)
            .await?
            .ok_or(BillingError::NotFound("transaction"))
    }

    async fn open_checkout(&self, transaction: &Transaction, plan: &Plan) -> Result<String> {
        let request = CheckoutRequest {
            order_id: transaction.id.to_string(),
            gross_amount: transaction.total,
            item: LineItem {
                id: plan.id.to_string(),
                name: plan.name.clone(),
                price: transaction.total,
                quantity: 1,
            },
            idempotency_key: transaction.idempotency_key,
        };
        let payment_url = self
            .gateway_call(self.gateway.create_checkout(&request))
            .await?;
        info!(transaction_id = %transaction.id, "checkout opened");
        Ok(payment_url)
    }

    async fn gateway_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.config.gateway_timeout, call)
            .await
            .map_err(|_| BillingError::Gateway("request timed out".to_string()))?
    }
}
