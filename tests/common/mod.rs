#![allow(dead_code)]

use async_trait::async_trait;
use billing_engine::application::catalog::Catalog;
use billing_engine::application::orchestrator::Orchestrator;
use billing_engine::config::EngineConfig;
use billing_engine::domain::gateway::{GatewayTransactionStatus, PaymentNotification};
use billing_engine::domain::money::{Amount, ApplyOption};
use billing_engine::domain::order::{Order, Transaction};
use billing_engine::domain::plan::{Currency, NewPlan, Plan};
use billing_engine::domain::ports::TransactionLedger;
use billing_engine::error::Result;
use billing_engine::infrastructure::in_memory::InMemoryStore;
use billing_engine::infrastructure::sandbox_gateway::SandboxGateway;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

pub const SERVER_KEY: &str = "test-server-key";

/// Ledger that counts how many orders it was asked to create.
#[derive(Clone, Default)]
pub struct CountingLedger {
    pub inner: InMemoryStore,
    pub creates: Arc<AtomicUsize>,
}

impl CountingLedger {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionLedger for CountingLedger {
    async fn create_order_and_transaction(
        &self,
        user_id: u64,
        plan_id: u64,
        currency: Currency,
        subtotal: Amount,
        options: &[ApplyOption],
    ) -> Result<Transaction> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_order_and_transaction(user_id, plan_id, currency, subtotal, options)
            .await
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.inner.get_transaction(id).await
    }

    async fn get_transaction_and_order(&self, id: Uuid) -> Result<Option<(Transaction, Order)>> {
        self.inner.get_transaction_and_order(id).await
    }

    async fn get_order_by_transaction_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.inner.get_order_by_transaction_id(id).await
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        transaction: &Transaction,
        expected_version: u32,
    ) -> Result<Transaction> {
        self.inner
            .update_transaction(id, transaction, expected_version)
            .await
    }
}

pub struct Harness {
    pub store: InMemoryStore,
    pub ledger: CountingLedger,
    pub gateway: SandboxGateway,
    pub orchestrator: Orchestrator,
    pub plan: Plan,
}

impl Harness {
    pub async fn new() -> Self {
        let store = InMemoryStore::new();
        let ledger = CountingLedger {
            inner: store.clone(),
            ..CountingLedger::default()
        };
        let gateway = SandboxGateway::new(SERVER_KEY);
        let orchestrator = Orchestrator::new(
            Catalog::new(Box::new(store.clone()), Box::new(store.clone())),
            Box::new(ledger.clone()),
            Box::new(store.clone()),
            Arc::new(gateway.clone()),
            EngineConfig::default(),
        )
        .unwrap();
        let plan = orchestrator
            .catalog()
            .create_plan(NewPlan::new("Basic", "Basic plan", dec!(100000), Currency::Idr, 30).unwrap())
            .await
            .unwrap();

        Self {
            store,
            ledger,
            gateway,
            orchestrator,
            plan,
        }
    }

    /// Settles the order at the sandbox gateway and returns the signed notification.
    pub async fn settle(
        &self,
        transaction_id: Uuid,
        status: GatewayTransactionStatus,
        fraud_status: &str,
    ) -> PaymentNotification {
        self.gateway
            .settle(&transaction_id.to_string(), status, fraud_status)
            .await
            .unwrap()
    }

    /// Checks out `plan` for `user_id` and delivers a settlement webhook for it.
    pub async fn purchase(&self, user_id: u64, plan_id: u64) -> Uuid {
        let session = self
            .orchestrator
            .checkout(user_id, plan_id, None)
            .await
            .unwrap();
        let notification = self
            .settle(
                session.transaction_id,
                GatewayTransactionStatus::Settlement,
                "accept",
            )
            .await;
        self.orchestrator
            .handle_webhook(&serde_json::to_vec(&notification).unwrap())
            .await
            .unwrap();
        session.transaction_id
    }
}
