use crate::error::{BillingError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// A strictly positive monetary amount, such as a plan price or a transaction subtotal.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(BillingError::InvalidAmount(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = BillingError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A percentage adjustment applied to a transaction, e.g. `Tax(dec!(12))` for 12%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOption {
    Discount(Decimal),
    Tax(Decimal),
    Fee(Decimal),
}

/// The percentages recorded on a transaction. Absent means "not applied".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Charges {
    pub discount: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub fee: Option<Decimal>,
}

impl Charges {
    /// Folds options into charges. A later option of the same kind replaces an earlier one.
    pub fn from_options(options: &[ApplyOption]) -> Self {
        options
            .iter()
            .fold(Self::default(), |mut charges, option| {
                match *option {
                    ApplyOption::Discount(p) => charges.discount = Some(p),
                    ApplyOption::Tax(p) => charges.tax = Some(p),
                    ApplyOption::Fee(p) => charges.fee = Some(p),
                }
                charges
            })
    }

    /// Computes the amounts owed on `subtotal`.
    ///
    /// Discount is taken off first, tax is charged on the discounted subtotal, and the
    /// processing fee is charged on the discounted subtotal plus tax. Only the total is
    /// rounded: two decimal places, midpoints away from zero.
    pub fn breakdown(&self, subtotal: Amount) -> Result<Breakdown> {
        if let Some(discount) = self.discount
            && (discount < Decimal::ZERO || discount > HUNDRED)
        {
            return Err(BillingError::InvalidAmount(format!(
                "discount percentage must be between 0 and 100, got {discount}"
            )));
        }
        for (name, rate) in [("tax", self.tax), ("fee", self.fee)] {
            if let Some(rate) = rate
                && rate < Decimal::ZERO
            {
                return Err(BillingError::InvalidAmount(format!(
                    "{name} percentage cannot be negative, got {rate}"
                )));
            }
        }

        let subtotal = subtotal.value();
        let discount_amount = percent_of(subtotal, self.discount)?;
        let discounted_subtotal = subtotal
            .checked_sub(discount_amount)
            .ok_or_else(overflow)?;
        let tax_amount = percent_of(discounted_subtotal, self.tax)?;
        let taxed = discounted_subtotal
            .checked_add(tax_amount)
            .ok_or_else(overflow)?;
        let fee_amount = percent_of(taxed, self.fee)?;

        let total = taxed
            .checked_add(fee_amount)
            .ok_or_else(overflow)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if total < Decimal::ZERO {
            return Err(BillingError::InvalidAmount(format!(
                "total cannot be negative, got {total}"
            )));
        }

        Ok(Breakdown {
            discount_amount,
            discounted_subtotal,
            tax_amount,
            fee_amount,
            total,
        })
    }
}

fn percent_of(base: Decimal, rate: Option<Decimal>) -> Result<Decimal> {
    match rate {
        None => Ok(Decimal::ZERO),
        Some(rate) => base
            .checked_mul(rate)
            .and_then(|scaled| scaled.checked_div(HUNDRED))
            .ok_or_else(overflow),
    }
}

fn overflow() -> BillingError {
    BillingError::InvalidAmount("amount is too large to price".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakdown {
    pub discount_amount: Decimal,
    pub discounted_subtotal: Decimal,
    pub tax_amount: Decimal,
    pub fee_amount: Decimal,
    pub total: Decimal,
}
