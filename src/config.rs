use crate::domain::money::ApplyOption;
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Charges and limits applied by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Percentage of the discounted subtotal charged as tax.
    pub tax_percent: Decimal,
    /// Percentage of the taxed subtotal charged as a processing fee.
    pub fee_percent: Decimal,
    /// Upper bound on a single payment gateway call.
    pub gateway_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax_percent: dec!(12),
            fee_percent: dec!(2),
            gateway_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tax_percent < Decimal::ZERO || self.tax_percent > dec!(100) {
            return Err(BillingError::InvalidArgument(format!(
                "tax percent must be between 0 and 100, got {}",
                self.tax_percent
            )));
        }
        if self.fee_percent < Decimal::ZERO {
            return Err(BillingError::InvalidArgument(format!(
                "fee percent cannot be negative, got {}",
                self.fee_percent
            )));
        }
        if self.gateway_timeout.is_zero() {
            return Err(BillingError::InvalidArgument(
                "gateway timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The charges every checkout carries, after an optional discount percentage.
    pub fn options(&self, discount_percent: Option<Decimal>) -> Vec<ApplyOption> {
        discount_percent
            .map(ApplyOption::Discount)
            .into_iter()
            .chain([
                ApplyOption::Tax(self.tax_percent),
                ApplyOption::Fee(self.fee_percent),
            ])
            .collect()
    }
}
