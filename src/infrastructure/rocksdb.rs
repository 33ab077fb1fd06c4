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
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column family for plans, keyed by big-endian plan id.
pub const CF_PLANS: &str = "plans";
/// Column family for discounts, keyed by big-endian discount id.
pub const CF_DISCOUNTS: &str = "discounts";
/// Discount code to discount id.
pub const CF_DISCOUNT_CODES: &str = "discount_codes";
/// `discount_id ++ plan_id` keys with empty values.
pub const CF_DISCOUNT_PLANS: &str = "discount_plans";
/// Column family for orders, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column family for transactions, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Subscriptions keyed by `user_id ++ subscription_id`, so a user's rows are contiguous.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Subscription id to owning user id.
pub const CF_SUBSCRIPTION_OWNERS: &str = "subscription_owners";
/// Id sequences.
pub const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_PLANS,
    CF_DISCOUNTS,
    CF_DISCOUNT_CODES,
    CF_DISCOUNT_PLANS,
    CF_ORDERS,
    CF_TRANSACTIONS,
    CF_SUBSCRIPTIONS,
    CF_SUBSCRIPTION_OWNERS,
    CF_META,
];

const PLAN_SEQUENCE: &str = "plan_seq";
const DISCOUNT_SEQUENCE: &str = "discount_seq";

/// A persistent implementation of every storage port on top of RocksDB.
///
/// Each multi-row operation is written as one `WriteBatch`. Writers are serialized by a
/// store-wide mutex so that the checks an operation makes still hold when its batch is
/// applied. Clones share the same database and lock.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Creates any missing column families, one per table plus `meta` for the id
    /// sequences, so a database written by an older run opens without migration.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Internal`] when RocksDB cannot open the path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::default(),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BillingError::internal(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &'static str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, cf: &'static str, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key)?.is_some())
    }

    /// Every value whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &'static str, prefix: &[u8]) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &'static str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn next_id(&self, batch: &mut WriteBatch, sequence: &'static str) -> Result<u64> {
        let id = self.read::<u64>(CF_META, sequence)?.unwrap_or(0) + 1;
        self.put(batch, CF_META, sequence, &id)?;
        Ok(id)
    }

    fn subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let Some(user_id) = self.read::<u64>(CF_SUBSCRIPTION_OWNERS, id.as_bytes())? else {
            return Ok(None);
        };
        self.read(CF_SUBSCRIPTIONS, subscription_key(user_id, id))
    }

    fn active_for(&self, user_id: u64) -> Result<Option<Subscription>> {
        let subscriptions: Vec<Subscription> =
            self.scan(CF_SUBSCRIPTIONS, &user_id.to_be_bytes())?;
        Ok(subscriptions.into_iter().find(Subscription::is_active))
    }

    fn put_subscription(&self, batch: &mut WriteBatch, subscription: &Subscription) -> Result<()> {
        self.put(
            batch,
            CF_SUBSCRIPTIONS,
            subscription_key(subscription.user_id, subscription.id),
            subscription,
        )?;
        self.put(
            batch,
            CF_SUBSCRIPTION_OWNERS,
            subscription.id.as_bytes(),
            &subscription.user_id,
        )
    }

    fn ensure_new_subscription(&self, subscription: &Subscription) -> Result<()> {
        if self.contains(CF_SUBSCRIPTION_OWNERS, subscription.id.as_bytes())? {
            return Err(BillingError::Duplicate("subscription"));
        }
        Ok(())
    }
}

fn subscription_key(user_id: u64, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn discount_plan_key(discount_id: u64, plan_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&discount_id.to_be_bytes());
    key[8..].copy_from_slice(&plan_id.to_be_bytes());
    key
}

#[async_trait]
impl PlanRepository for RocksDbStore {
    async fn get(&self, id: u64) -> Result<Option<Plan>> {
        self.read(CF_PLANS, id.to_be_bytes())
    }

    async fn list(&self) -> Result<Vec<Plan>> {
        self.scan(CF_PLANS, &[])
    }

    async fn create(&self, plan: NewPlan) -> Result<Plan> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, PLAN_SEQUENCE)?;
        let plan = plan.into_plan(id, 0);
        self.put(&mut batch, CF_PLANS, id.to_be_bytes(), &plan)?;
        self.db.write(batch)?;
        Ok(plan)
    }

    async fn update(&self, id: u64, plan: NewPlan, expected_version: u32) -> Result<Plan> {
        let _guard = self.write_lock.lock().await;
        let stored: Plan = self
            .read(CF_PLANS, id.to_be_bytes())?
            .ok_or(BillingError::NotFound("plan"))?;
        if stored.version != expected_version {
            return Err(BillingError::Conflict("plan"));
        }
        let plan = plan.into_plan(id, expected_version + 1);
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_PLANS, id.to_be_bytes(), &plan)?;
        self.db.write(batch)?;
        Ok(plan)
    }
}

#[async_trait]
impl DiscountRepository for RocksDbStore {
    async fn validate_and_get(&self, code: &str, plan_id: u64) -> Result<Option<Discount>> {
        let Some(id) = self.read::<u64>(CF_DISCOUNT_CODES, code)? else {
            return Ok(None);
        };
        let Some(discount) = self.read::<Discount>(CF_DISCOUNTS, id.to_be_bytes())? else {
            return Ok(None);
        };
        let applies = match discount.scope {
            DiscountScope::All => true,
            DiscountScope::Plan => {
                self.contains(CF_DISCOUNT_PLANS, discount_plan_key(discount.id, plan_id))?
            }
        };
        Ok(applies.then_some(discount))
    }

    async fn get(&self, id: u64) -> Result<Option<Discount>> {
        self.read(CF_DISCOUNTS, id.to_be_bytes())
    }

    async fn create(&self, discount: NewDiscount) -> Result<Discount> {
        let _guard = self.write_lock.lock().await;
        if self.contains(CF_DISCOUNT_CODES, &discount.code)? {
            return Err(BillingError::Duplicate("discount"));
        }
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, DISCOUNT_SEQUENCE)?;
        let discount = discount.into_discount(id);
        self.put(&mut batch, CF_DISCOUNTS, id.to_be_bytes(), &discount)?;
        self.put(&mut batch, CF_DISCOUNT_CODES, &discount.code, &id)?;
        self.db.write(batch)?;
        Ok(discount)
    }

    async fn attach_plans(&self, discount_id: u64, plan_ids: &[u64]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.contains(CF_DISCOUNTS, discount_id.to_be_bytes())? {
            return Err(BillingError::NotFound("discount"));
        }
        let mut batch = WriteBatch::default();
        for plan_id in plan_ids {
            if !self.contains(CF_PLANS, plan_id.to_be_bytes())? {
                return Err(BillingError::NotFound("plan"));
            }
            batch.put_cf(
                self.cf(CF_DISCOUNT_PLANS)?,
                discount_plan_key(discount_id, *plan_id),
                b"",
            );
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionLedger for RocksDbStore {
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

        let _guard = self.write_lock.lock().await;
        if self.contains(CF_ORDERS, order.id.as_bytes())? {
            return Err(BillingError::Duplicate("order"));
        }
        if self.contains(CF_TRANSACTIONS, transaction.id.as_bytes())? {
            return Err(BillingError::Duplicate("transaction"));
        }
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_ORDERS, order.id.as_bytes(), &order)?;
        self.put(
            &mut batch,
            CF_TRANSACTIONS,
            transaction.id.as_bytes(),
            &transaction,
        )?;
        self.db.write(batch)?;
        Ok(transaction)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn get_transaction_and_order(&self, id: Uuid) -> Result<Option<(Transaction, Order)>> {
        let Some(transaction) = self.read::<Transaction>(CF_TRANSACTIONS, id.as_bytes())? else {
            return Ok(None);
        };
        let order = self
            .read::<Order>(CF_ORDERS, transaction.order_id.as_bytes())?
            .ok_or(BillingError::NotFound("order"))?;
        Ok(Some((transaction, order)))
    }

    async fn get_order_by_transaction_id(&self, id: Uuid) -> Result<Option<Order>> {
        let Some(transaction) = self.read::<Transaction>(CF_TRANSACTIONS, id.as_bytes())? else {
            return Ok(None);
        };
        self.read(CF_ORDERS, transaction.order_id.as_bytes())
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        transaction: &Transaction,
        expected_version: u32,
    ) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        let stored: Option<Transaction> = self.read(CF_TRANSACTIONS, id.as_bytes())?;
        let next = guards::next_transaction(stored.as_ref(), transaction, expected_version)?;
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_TRANSACTIONS, id.as_bytes(), &next)?;
        self.db.write(batch)?;
        Ok(next)
    }
}

#[async_trait]
impl SubscriptionStore for RocksDbStore {
    async fn get_all(&self, user_id: u64) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> =
            self.scan(CF_SUBSCRIPTIONS, &user_id.to_be_bytes())?;
        subscriptions.sort_by_key(|s| s.start_date);
        Ok(subscriptions)
    }

    async fn get_active(&self, user_id: u64) -> Result<Option<Subscription>> {
        self.active_for(user_id)
    }

    async fn create(&self, subscription: &Subscription, completing: &Transaction) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let stored: Option<Transaction> = self.read(CF_TRANSACTIONS, completing.id.as_bytes())?;
        let transaction = guards::completing_transaction(stored.as_ref(), completing)?;
        if self.active_for(subscription.user_id)?.is_some() {
            return Err(BillingError::Conflict("subscription"));
        }
        self.ensure_new_subscription(subscription)?;

        let mut batch = WriteBatch::default();
        self.put_subscription(&mut batch, subscription)?;
        self.put(
            &mut batch,
            CF_TRANSACTIONS,
            transaction.id.as_bytes(),
            &transaction,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn pause_and_create(
        &self,
        paused: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<Subscription> {
        let _guard = self.write_lock.lock().await;
        let stored = self.subscription(paused.id)?;
        let mut current = guards::replaced_subscription(stored.as_ref(), paused, new)?;
        let stored: Option<Transaction> = self.read(CF_TRANSACTIONS, completing.id.as_bytes())?;
        let transaction = guards::completing_transaction(stored.as_ref(), completing)?;
        self.ensure_new_subscription(new)?;

        current.pause(Utc::now());
        let mut batch = WriteBatch::default();
        self.put_subscription(&mut batch, &current)?;
        self.put_subscription(&mut batch, new)?;
        self.put(
            &mut batch,
            CF_TRANSACTIONS,
            transaction.id.as_bytes(),
            &transaction,
        )?;
        self.db.write(batch)?;
        Ok(current)
    }

    async fn expire_and_create(
        &self,
        expired: &Subscription,
        new: &Subscription,
        completing: &Transaction,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let stored = self.subscription(expired.id)?;
        let mut current = guards::replaced_subscription(stored.as_ref(), expired, new)?;
        let stored: Option<Transaction> = self.read(CF_TRANSACTIONS, completing.id.as_bytes())?;
        let transaction = guards::completing_transaction(stored.as_ref(), completing)?;
        self.ensure_new_subscription(new)?;

        current.expire();
        let mut batch = WriteBatch::default();
        self.put_subscription(&mut batch, &current)?;
        self.put_subscription(&mut batch, new)?;
        self.put(
            &mut batch,
            CF_TRANSACTIONS,
            transaction.id.as_bytes(),
            &transaction,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        subscription: &Subscription,
        expected_version: u32,
    ) -> Result<Subscription> {
        let _guard = self.write_lock.lock().await;
        let stored = self.subscription(id)?;
        let next = guards::next_subscription(stored.as_ref(), subscription, expected_version)?;
        if next.is_active()
            && self
                .active_for(next.user_id)?
                .is_some_and(|active| active.id != id)
        {
            return Err(BillingError::Conflict("subscription"));
        }
        let mut batch = WriteBatch::default();
        self.put_subscription(&mut batch, &next)?;
        self.db.write(batch)?;
        Ok(next)
    }
}
