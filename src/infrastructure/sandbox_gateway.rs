use crate::domain::gateway::{
    CheckoutRequest, GatewayTransactionStatus, PaymentGateway, PaymentNotification,
    compute_signature, format_gross_amount, signature_matches,
};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "https://app.sandbox.gateway.local";

struct SandboxOrder {
    idempotency_key: Uuid,
    payment_url: String,
    notification: PaymentNotification,
}

/// An in-process payment gateway.
///
/// Checkouts are deduplicated by idempotency key and every notification it hands out is
/// signed with the configured server key, so it can stand in for the real gateway in
/// tests and local runs. Clones share the same order book.
#[derive(Clone)]
pub struct SandboxGateway {
    server_key: String,
    base_url: String,
    orders: Arc<RwLock<HashMap<String, SandboxOrder>>>,
    unavailable: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl SandboxGateway {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            orders: Arc::default(),
            unavailable: Arc::default(),
            latency: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Delays every remote call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// While set, every remote call fails with a gateway error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn checkout_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Moves an order to `status` and returns the signed notification the gateway would
    /// push to the webhook.
    pub async fn settle(
        &self,
        order_id: &str,
        status: GatewayTransactionStatus,
        fraud_status: &str,
    ) -> Result<PaymentNotification> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BillingError::Gateway(format!("order {order_id} does not exist")))?;

        let notification = &mut order.notification;
        notification.transaction_status = status.as_str().to_string();
        notification.fraud_status = fraud_status.to_string();
        notification.status_code = status_code(status).to_string();
        notification.status_message = format!("transaction is {}", status.as_str());
        notification.transaction_time = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        notification.signature_key = compute_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &self.server_key,
        );
        debug!(order_id, status = status.as_str(), "sandbox order settled");
        Ok(notification.clone())
    }

    async fn remote_call(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("gateway unavailable".to_string()));
        }
        Ok(())
    }
}

fn status_code(status: GatewayTransactionStatus) -> &'static str {
    match status {
        GatewayTransactionStatus::Capture | GatewayTransactionStatus::Settlement => "200",
        GatewayTransactionStatus::Pending => "201",
        _ => "202",
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<String> {
        self.remote_call().await?;

        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.get(&request.order_id) {
            if existing.idempotency_key != request.idempotency_key {
                return Err(BillingError::Gateway(format!(
                    "order {} already exists",
                    request.order_id
                )));
            }
            return Ok(existing.payment_url.clone());
        }

        let payment_url = format!("{}/snap/v4/redirection/{}", self.base_url, Uuid::new_v4());
        let gross_amount = format_gross_amount(request.gross_amount);
        let status_code = status_code(GatewayTransactionStatus::Pending).to_string();
        let notification = PaymentNotification {
            transaction_time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            transaction_status: GatewayTransactionStatus::Pending.as_str().to_string(),
            transaction_id: Uuid::new_v4().to_string(),
            status_message: "transaction is pending".to_string(),
            signature_key: compute_signature(
                &request.order_id,
                &status_code,
                &gross_amount,
                &self.server_key,
            ),
            status_code,
            order_id: request.order_id.clone(),
            merchant_id: "SANDBOX".to_string(),
            gross_amount,
            fraud_status: String::new(),
            currency: "IDR".to_string(),
        };
        orders.insert(
            request.order_id.clone(),
            SandboxOrder {
                idempotency_key: request.idempotency_key,
                payment_url: payment_url.clone(),
                notification,
            },
        );
        debug!(order_id = %request.order_id, "sandbox checkout opened");
        Ok(payment_url)
    }

    async fn fetch_status(&self, order_id: &str) -> Result<PaymentNotification> {
        self.remote_call().await?;
        self.orders
            .read()
            .await
            .get(order_id)
            .map(|order| order.notification.clone())
            .ok_or_else(|| BillingError::Gateway(format!("order {order_id} does not exist")))
    }

    fn verify_signature(
        &self,
        order_id: &str,
        status_code: &str,
        gross_amount: &str,
        signature: &str,
    ) -> bool {
        signature_matches(order_id, status_code, gross_amount, &self.server_key, signature)
    }
}
