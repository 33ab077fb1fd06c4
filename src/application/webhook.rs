use crate::domain::gateway::{GatewayTransactionStatus, PaymentNotification, SharedGateway};
use crate::domain::order::PaymentStatus;
use crate::error::{BillingError, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Authenticates gateway notifications before the engine acts on them.
pub struct WebhookVerifier {
    gateway: SharedGateway,
    timeout: Duration,
}

impl WebhookVerifier {
    pub fn new(gateway: SharedGateway, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Checks the signature, then cross-checks the payload against the gateway's own
    /// record of the order and maps the confirmed status.
    ///
    /// Nothing is trusted from the payload unless both checks pass.
    pub async fn verify(&self, notification: &PaymentNotification) -> Result<PaymentStatus> {
        if !self.gateway.verify_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &notification.signature_key,
        ) {
            warn!(order_id = %notification.order_id, "webhook signature rejected");
            return Err(BillingError::Unauthorized);
        }

        let authoritative = timeout(self.timeout, self.gateway.fetch_status(&notification.order_id))
            .await
            .map_err(|_| BillingError::Gateway("status request timed out".to_string()))??;

        if let Some(field) = first_mismatch(notification, &authoritative) {
            warn!(order_id = %notification.order_id, field, "webhook payload does not match gateway");
            return Err(BillingError::PayloadMismatch(field));
        }

        let status: GatewayTransactionStatus = notification.transaction_status.parse()?;
        Ok(status.payment_status(&notification.fraud_status))
    }
}

fn first_mismatch(
    received: &PaymentNotification,
    authoritative: &PaymentNotification,
) -> Option<&'static str> {
    [
        (
            "transaction_time",
            &received.transaction_time,
            &authoritative.transaction_time,
        ),
        (
            "transaction_status",
            &received.transaction_status,
            &authoritative.transaction_status,
        ),
        (
            "transaction_id",
            &received.transaction_id,
            &authoritative.transaction_id,
        ),
        ("order_id", &received.order_id, &authoritative.order_id),
        (
            "gross_amount",
            &received.gross_amount,
            &authoritative.gross_amount,
        ),
        (
            "fraud_status",
            &received.fraud_status,
            &authoritative.fraud_status,
        ),
        ("currency", &received.currency, &authoritative.currency),
    ]
    .into_iter()
    .find(|(_, received, authoritative)| received != authoritative)
    .map(|(field, _, _)| field)
}
