use super::guards;
use crate::domain::money::{Amount, ApplyOption};
use crate::domain::order::{Order, Transaction};
use crate::domain::plan::{Currency, Discount, DiscountScope, NewDiscount, NewPlan, Plan};
use crate::domain::ports::{
    DiscountRepository, PlanRepository, SubscriptionStore, TransactionLedger,
};
use crate::domain::subscription::Subscription;
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    plans: BTreeMap<u64, Plan>,
    discounts: BTreeMap<u64, Discount>,
    discount_plans: BTreeSet<(u64, u64)>,
    orders: HashMap<Uuid, Order>,
    transactions: HashMap<Uuid, Transaction>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl Tables {
    fn active_for(&self, user_id: u64) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.is_active())
    }

    fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        if self.subscriptions.contains_key(&subscription.id) {
            return Err(BillingError::Duplicate("subscription"));
        }
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }
}

/// A thread-safe in-memory implementation of every storage port.
///
/// Uses one `Arc<RwLock<Tables>>` holding plans, discounts, orders, transactions and
/// subscriptions. An operation that touches several tables holds one write guard for its
/// whole duration: it either applies completely or, when a check fails, not at all.
/// Ideal for tests and for runs where persistence is not required.
///
/// This struct is thread-safe (`Clone` shares the underlying tables).
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    ///
    /// Plan and discount ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryStore {
    async fn get(&self, id: u64) -> Result<Option<Plan>> {
        let tables = self.tables.read().await;
        Ok(tables.plans.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Plan>> {
        let tables = self.tables.read().await;
        Ok(tables.plans.values().cloned().collect())
    }

    async fn create(&self, plan: NewPlan) -> Result<Plan> {
        let mut tables = self.tables.write().await;
        let id = tables.plans.keys().next_back().map_or(1, |last| last + 1);
        let plan = plan.into_plan(id, 0);
        tables.plans.insert(id, plan.clone());
        Ok(plan)
    }

    async fn update(&self, id: u64, plan: NewPlan, expected_version: u32) -> Result<Plan> {
        let mut tables = self.tables.write().await;
        let stored = tables.plans.get(&id).ok_or(BillingError::NotFound("plan"))?;
        if stored.version != expected_version {
            return Err(BillingError::Conflict("plan"));
        }
        let plan = plan.into_plan(id, expected_version + 1);
        tables.plans.insert(id, plan.clone());
        Ok(plan)
    }
}

#[async_trait]
impl DiscountRepository for InMemoryStore {
    async fn validate_and_get(&self, code: &str, plan_id: u64) -> Result<Option<Discount>> {
        let tables = self.tables.read().await;
        Ok(tables
            .discounts
            .values()
            .find(|d| {
                d.code == code
                    && match d.scope {
                        DiscountScope::All => true,
                        DiscountScope::Plan => tables.discount_plans.contains(&(d.id, plan_id)),
                    }
            })
            .cloned())
    }

    async fn get(&self, id: u64) -> Result<Option<Discount>> {
        let tables = self.tables.read().await;
        Ok(tables.discounts.get(&id).cloned())
    }

    async fn create(&self, discount: NewDiscount) -> Result<Discount> {
        let mut tables = self.tables.write().await;
        if tables.discounts.values().any(|d| d.code == discount.code) {
            return Err(BillingError::Duplicate("discount"));
        }
        let id = tables
            .discounts
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        let discount = discount.into_discount(id);
        tables.discounts.insert(id, discount.clone());
        Ok(discount)
    }

    async fn attach_plans(&self, discount_id: u64, plan_ids: &[u64]) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.discounts.contains_key(&discount_id) {
            return Err(BillingError::NotFound("discount"));
        }
        if plan_ids.iter().any(|id| !tables.plans.contains_key(id)) {
            return Err(BillingError::NotFound("plan"));
        }
        for plan_id in plan_ids {
            tables.discount_plans.insert((discount_id, *plan_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLedger for InMemoryStore {
    async fn create_order_and_transaction(
        &self,
        user_id: u64,
        plan_id: u64,
        currency: Currency,
        subtotal: Amount,
        options: &[ApplyOption],
    ) -> Result<Transaction> {
        let order = Order::new(user_id, plan_id)?;
        let transaction = Transaction::new(order.id, subtotal, currency, options)?;

        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id) {
            return Err(BillingError::Duplicate("order"));
        }
        if tables.transactions.contains_key(&transaction.id) {
            return Err(BillingError::Duplicate("transaction"));
        }
        tables.orders.insert(order.id, order);
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn get_transaction_and_order(&self, id: Uuid) -> Result<Option<(Transaction, Order)>> {
        let tables = self.tables.read().await;
        let Some(transaction) = tables.transactions.get(&id) else {
            return Ok(None);
        };
        let order = tables
            .orders
            .get(&transaction.order_id)
            .ok_or(BillingError::NotFound("order"))?;
        Ok(Some((transaction.clone(), order.clone())))
    }

    async fn get_order_by_transaction_id(&self, id: Uuid) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .get(&id)
            .and_then(|t| tables.orders.get(&t.order_id))
            .cloned())
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        transaction: &Transaction,
        expected_version: u32,
    ) -> Result<Transaction> {
        let mut tables = self.tables.write().await;
        let next =
            guards::next_transaction(tables.transactions.get(&id), transaction, expected_version)?;
        tables.transactions.insert(id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn get_all(&self, user_id: u64) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        let mut subscriptions: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.start_date);
        Ok(subscriptions)
    }

    async fn get_active(&self, user_id: u64) -> Result<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables.active_for(user_id).cloned())
    }

    async fn create(&self, subscription: &Subscription, completing: &Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        let transaction =
            guards::completing_transaction(tables.transactions.get(&completing.id), completing)?;
        if tables.active_for(subscription.user_id).is_some() {
            return Err(BillingError::Conflict("subscription"));
        }

        tables.insert_subscription(subscription)?;
        tables.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn pause_and_create(
        &self,
        paused: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<Subscription> {
        let mut tables = self.tables.write().await;
        let mut current =
            guards::replaced_subscription(tables.subscriptions.get(&paused.id), paused, new)?;
        let transaction =
            guards::completing_transaction(tables.transactions.get(&completing.id), completing)?;
        if tables.subscriptions.contains_key(&new.id) {
            return Err(BillingError::Duplicate("subscription"));
        }

        current.pause(Utc::now());
        tables.subscriptions.insert(current.id, current.clone());
        tables.insert_subscription(new)?;
        tables.transactions.insert(transaction.id, transaction);
        Ok(current)
    }

    async fn expire_and_create(
        &self,
        expired: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut current =
            guards::replaced_subscription(tables.subscriptions.get(&expired.id), expired, new)?;
        let transaction =
            guards::completing_transaction(tables.transactions.get(&completing.id), completing)?;
        if tables.subscriptions.contains_key(&new.id) {
            return Err(BillingError::Duplicate("subscription"));
        }

        current.expire();
        tables.subscriptions.insert(current.id, current);
        tables.insert_subscription(new)?;
        tables.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        subscription: &Subscription,
        expected_version: u32,
    ) -> Result<Subscription> {
        let mut tables = self.tables.write().await;
        let next =
            guards::next_subscription(tables.subscriptions.get(&id), subscription, expected_version)?;
        if next.is_active()
            && tables
                .active_for(next.user_id)
                .is_some_and(|active| active.id != id)
        {
            return Err(BillingError::Conflict("subscription"));
        }
        tables.subscriptions.insert(id, next.clone());
        Ok(next)
    }
}
