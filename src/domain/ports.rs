//! Storage ports consumed by the engine.
//!
//! Every update of a row that can be written concurrently takes the version the caller
//! loaded. Implementations must reject the write with `BillingError::Conflict` when the
//! stored version differs, and must apply multi-row operations all-or-nothing.

use super::money::{Amount, ApplyOption};
use super::order::{Order, Transaction};
use super::plan::{Currency, Discount, NewDiscount, NewPlan, Plan};
use super::subscription::Subscription;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<Plan>>;
    async fn list(&self) -> Result<Vec<Plan>>;
    async fn create(&self, plan: NewPlan) -> Result<Plan>;
    async fn update(&self, id: u64, plan: NewPlan, expected_version: u32) -> Result<Plan>;
}

#[async_trait]
pub trait DiscountRepository: Send + Sync {
    /// Resolves `code` for `plan_id`: an `ALL` discount always resolves, a `PLAN` discount
    /// only when attached to the plan. Validity dates are not checked here.
    async fn validate_and_get(&self, code: &str, plan_id: u64) -> Result<Option<Discount>>;
    async fn get(&self, id: u64) -> Result<Option<Discount>>;
    async fn create(&self, discount: NewDiscount) -> Result<Discount>;
    /// Attaching an already attached plan is a no-op.
    async fn attach_plans(&self, discount_id: u64, plan_ids: &[u64]) -> Result<()>;
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Inserts an order and its priced, pending transaction as one unit.
    async fn create_order_and_transaction(
        &self,
        user_id: u64,
        plan_id: u64,
        currency: Currency,
        subtotal: Amount,
        options: &[ApplyOption],
    ) -> Result<Transaction>;
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn get_transaction_and_order(&self, id: Uuid) -> Result<Option<(Transaction, Order)>>;
    async fn get_order_by_transaction_id(&self, id: Uuid) -> Result<Option<Order>>;
    async fn update_transaction(
        &self,
        id: Uuid,
        transaction: &Transaction,
        expected_version: u32,
    ) -> Result<Transaction>;
}

/// Subscription persistence. Operations that take a `completing` transaction also
/// persist that transaction's new status in the same unit, guarded by the version it
/// carries.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_all(&self, user_id: u64) -> Result<Vec<Subscription>>;
    async fn get_active(&self, user_id: u64) -> Result<Option<Subscription>>;
    /// Fails with `Conflict` if the user already has an active subscription.
    async fn create(&self, subscription: &Subscription, completing: &Transaction) -> Result<()>;
    /// Pauses `paused` as of now, activates `new` and completes the transaction.
    /// Returns the paused subscription as stored.
    async fn pause_and_create(
        &self,
        paused: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<Subscription>;
    async fn expire_and_create(
        &self,
        expired: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<()>;
    async fn update(
        &self,
        id: Uuid,
        subscription: &Subscription,
        expected_version: u32,
    ) -> Result<Subscription>;
}

pub type PlanRepositoryBox = Box<dyn PlanRepository>;
pub type DiscountRepositoryBox = Box<dyn DiscountRepository>;
pub type TransactionLedgerBox = Box<dyn TransactionLedger>;
pub type SubscriptionStoreBox = Box<dyn SubscriptionStore>;
