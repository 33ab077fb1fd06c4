use crate::domain::order::PaymentStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

/// Why a discount code could not be applied to a checkout.
///
/// The variants are checked in declaration order, so an expired code reports
/// `Expired` even though its start date has also passed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountError {
    #[error("discount code is empty")]
    EmptyCode,
    #[error("discount is not applicable to this plan")]
    Invalid,
    #[error("discount is expired")]
    Expired,
    #[error("discount is not yet active")]
    Inactive,
}

/// Coarse classification of a [`BillingError`], meant for transport adapters that
/// translate engine failures into wire status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    Conflict,
    InvalidArgument,
    Unauthorized,
    PayloadMismatch,
    Gateway,
    Internal,
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Duplicate(&'static str),
    #[error("{0} was modified concurrently")]
    Conflict(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Discount(#[from] DiscountError),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("transaction is {from}, cannot become {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("invalid webhook signature")]
    Unauthorized,
    #[error("webhook {0} does not match the gateway status")]
    PayloadMismatch(&'static str),
    #[error("unknown transaction status: {0}")]
    UnknownStatus(String),
    #[error("payment gateway error: {0}")]
    Gateway(String),
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::NotFound(_) => ErrorKind::NotFound,
            BillingError::Duplicate(_) => ErrorKind::Duplicate,
            BillingError::Conflict(_) | BillingError::InvalidTransition { .. } => {
                ErrorKind::Conflict
            }
            BillingError::InvalidArgument(_)
            | BillingError::Discount(_)
            | BillingError::InvalidAmount(_)
            | BillingError::UnknownStatus(_) => ErrorKind::InvalidArgument,
            BillingError::Unauthorized => ErrorKind::Unauthorized,
            BillingError::PayloadMismatch(_) => ErrorKind::PayloadMismatch,
            BillingError::Gateway(_) => ErrorKind::Gateway,
            BillingError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        BillingError::Internal(message.into().into())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Internal(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for BillingError {
    fn from(err: rocksdb::Error) -> Self {
        BillingError::Internal(Box::new(err))
    }
}
