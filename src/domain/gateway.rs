//! The contract the engine consumes from an external payment gateway.
//!
//! The engine never talks HTTP itself. It asks the gateway for a checkout redirect, for
//! the authoritative status of an order, and whether a notification signature is
//! genuine. Notification signatures are lowercase hex SHA-512 digests of
//! `order_id || status_code || gross_amount || server_key`.

use crate::domain::order::PaymentStatus;
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// The single item sold by a checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// The engine's transaction id, used as the gateway order id.
    pub order_id: String,
    pub gross_amount: Decimal,
    pub item: LineItem,
    pub idempotency_key: Uuid,
}

/// A payment status notification, either pushed by the gateway to the webhook or fetched
/// from it on demand. Field names follow the gateway's JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub transaction_time: String,
    pub transaction_status: String,
    pub transaction_id: String,
    #[serde(default)]
    pub status_message: String,
    pub status_code: String,
    #[serde(default)]
    pub signature_key: String,
    pub order_id: String,
    #[serde(default)]
    pub merchant_id: String,
    pub gross_amount: String,
    #[serde(default)]
    pub fraud_status: String,
    pub currency: String,
}

impl PaymentNotification {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| BillingError::InvalidArgument(format!("malformed webhook payload: {e}")))
    }
}

/// Transaction states reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTransactionStatus {
    Capture,
    Settlement,
    Pending,
    Cancel,
    Deny,
    Expire,
    Failure,
}

impl FromStr for GatewayTransactionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "capture" => Ok(Self::Capture),
            "settlement" => Ok(Self::Settlement),
            "pending" => Ok(Self::Pending),
            "cancel" => Ok(Self::Cancel),
            "deny" => Ok(Self::Deny),
            "expire" => Ok(Self::Expire),
            "failure" => Ok(Self::Failure),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

impl GatewayTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Settlement => "settlement",
            Self::Pending => "pending",
            Self::Cancel => "cancel",
            Self::Deny => "deny",
            Self::Expire => "expire",
            Self::Failure => "failure",
        }
    }

    /// Maps a gateway status onto the engine's payment status. A captured card payment
    /// only counts once the gateway's fraud check accepted it.
    pub fn payment_status(&self, fraud_status: &str) -> PaymentStatus {
        match self {
            Self::Capture if fraud_status == "accept" => PaymentStatus::Completed,
            Self::Capture => PaymentStatus::Failed,
            Self::Settlement => PaymentStatus::Completed,
            Self::Cancel | Self::Deny | Self::Expire | Self::Failure => PaymentStatus::Failed,
            Self::Pending => PaymentStatus::Pending,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a hosted checkout and returns the URL to redirect the customer to.
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<String>;

    /// Fetches the gateway's own record of an order.
    async fn fetch_status(&self, order_id: &str) -> Result<PaymentNotification>;

    fn verify_signature(
        &self,
        order_id: &str,
        status_code: &str,
        gross_amount: &str,
        signature: &str,
    ) -> bool;
}

pub type SharedGateway = Arc<dyn PaymentGateway>;

pub fn compute_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of `signature` against the expected digest.
pub fn signature_matches(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
    signature: &str,
) -> bool {
    let expected = compute_signature(order_id, status_code, gross_amount, server_key);
    let provided = signature.as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided).into()
}

/// Formats an amount the way the gateway reports `gross_amount`.
pub fn format_gross_amount(amount: Decimal) -> String {
    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", amount)
}
