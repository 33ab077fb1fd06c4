use crate::domain::money::Amount;
use crate::error::{BillingError, DiscountError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Idr,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Idr => "IDR",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IDR" => Ok(Currency::Idr),
            "USD" => Ok(Currency::Usd),
            "" => Err(BillingError::InvalidArgument(
                "currency code cannot be empty".to_string(),
            )),
            other => Err(BillingError::InvalidArgument(format!(
                "invalid currency code: {other}"
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Longest plan term accepted by [`NewPlan::new`], one hundred years.
pub const MAX_DURATION_DAYS: u32 = 36_500;

/// A purchasable subscription plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: Amount,
    pub currency: Currency,
    pub duration_days: u32,
    pub version: u32,
}

impl Plan {
    /// End of a term starting at `start`, clamped to the latest representable instant.
    pub fn end_date(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_signed(Duration::days(i64::from(self.duration_days)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Validated input for creating or updating a plan. Ids and versions are assigned by
/// the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub description: String,
    pub price: Amount,
    pub currency: Currency,
    pub duration_days: u32,
}

impl NewPlan {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        price: Decimal,
        currency: Currency,
        duration_days: u32,
    ) -> Result<Self> {
        let name = name.into();
        let description = description.into();
        if name.trim().is_empty() {
            return Err(invalid("plan name cannot be empty"));
        }
        if description.trim().is_empty() {
            return Err(invalid("plan description cannot be empty"));
        }
        let price = Amount::new(price)?;
        if duration_days == 0 {
            return Err(invalid("plan duration must be greater than zero"));
        }
        if duration_days > MAX_DURATION_DAYS {
            return Err(BillingError::InvalidArgument(format!(
                "plan duration cannot exceed {MAX_DURATION_DAYS} days"
            )));
        }
        if duration_days % 30 != 0 && !(30..=90).contains(&duration_days) {
            return Err(invalid(
                "plan duration must be a multiple of 30 or between 30 and 90 days",
            ));
        }

        Ok(Self {
            name,
            description,
            price,
            currency,
            duration_days,
        })
    }

    pub fn into_plan(self, id: u64, version: u32) -> Plan {
        Plan {
            id,
            name: self.name,
            description: self.description,
            price: self.price,
            currency: self.currency,
            duration_days: self.duration_days,
            version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountScope {
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "PLAN")]
    Plan,
}

impl FromStr for DiscountScope {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ALL" => Ok(DiscountScope::All),
            "PLAN" => Ok(DiscountScope::Plan),
            other => Err(BillingError::InvalidArgument(format!(
                "invalid discount scope: {other}"
            ))),
        }
    }
}

impl fmt::Display for DiscountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountScope::All => f.write_str("ALL"),
            DiscountScope::Plan => f.write_str("PLAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: u64,
    pub code: String,
    pub description: String,
    pub scope: DiscountScope,
    pub percentage: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub version: u32,
}

impl Discount {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.ends_at
    }

    /// Only checks that the window has opened. Callers check expiry first.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at
    }

    /// Checks the validity window: expiry first, then activation.
    pub fn check_window(&self, now: DateTime<Utc>) -> std::result::Result<(), DiscountError> {
        if self.is_expired(now) {
            return Err(DiscountError::Expired);
        }
        if !self.is_active(now) {
            return Err(DiscountError::Inactive);
        }
        Ok(())
    }

    /// Whether the discount may be attached to specific plans right now.
    pub fn check_attachable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.scope != DiscountScope::Plan {
            return Err(invalid("only PLAN-scoped discounts can be attached to plans"));
        }
        self.check_window(now)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiscount {
    pub code: String,
    pub description: String,
    pub scope: DiscountScope,
    pub percentage: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl NewDiscount {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        scope: DiscountScope,
        percentage: Decimal,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Self> {
        let code = code.into();
        let description = description.into();
        if code.trim().is_empty() {
            return Err(invalid("discount code cannot be empty"));
        }
        if description.trim().is_empty() {
            return Err(invalid("discount description cannot be empty"));
        }
        if percentage <= Decimal::ZERO {
            return Err(invalid("discount value must be greater than zero"));
        }
        // 100% is a legitimate giveaway
        if percentage > Decimal::ONE_HUNDRED {
            return Err(invalid("discount value must be at most 100"));
        }
        if starts_at > ends_at {
            return Err(invalid("discount cannot end before it starts"));
        }

        Ok(Self {
            code,
            description,
            scope,
            percentage,
            starts_at,
            ends_at,
        })
    }

    pub fn into_discount(self, id: u64) -> Discount {
        Discount {
            id,
            code: self.code,
            description: self.description,
            scope: self.scope,
            percentage: self.percentage,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            version: 0,
        }
    }
}

fn invalid(message: &str) -> BillingError {
    BillingError::InvalidArgument(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_parsing() {
        assert_eq!("IDR".parse::<Currency>().unwrap(), Currency::Idr);
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("EUR".parse::<Currency>().is_err());
        assert!("".parse::<Currency>().is_err());
        assert_eq!(Currency::Idr.to_string(), "IDR");
    }

    #[test]
    fn test_plan_duration_rules() {
        let plan = |days| NewPlan::new("Basic", "Basic plan", dec!(100), Currency::Idr, days);
        assert!(plan(30).is_ok());
        assert!(plan(45).is_ok());
        assert!(plan(90).is_ok());
        assert!(plan(360).is_ok());
        assert!(plan(0).is_err());
        assert!(plan(7).is_err());
        assert!(plan(100).is_err());
        assert!(plan(MAX_DURATION_DAYS).is_ok());
        assert!(matches!(
            plan(4_294_967_280),
            Err(BillingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_plan_requires_positive_price_and_names() {
        assert!(matches!(
            NewPlan::new("Basic", "Basic plan", dec!(0), Currency::Usd, 30),
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(NewPlan::new("", "Basic plan", dec!(1), Currency::Usd, 30).is_err());
        assert!(NewPlan::new("Basic", " ", dec!(1), Currency::Usd, 30).is_err());
    }

    #[test]
    fn test_plan_end_date() {
        let plan = NewPlan::new("Basic", "Basic plan", dec!(10), Currency::Usd, 30)
            .unwrap()
            .into_plan(1, 0);
        let start = Utc::now();
        assert_eq!(plan.end_date(start) - start, Duration::days(30));
    }

    #[test]
    fn test_stored_plan_with_huge_term_ends_at_max_date() {
        let mut plan = NewPlan::new("Basic", "Basic plan", dec!(10), Currency::Usd, 30)
            .unwrap()
            .into_plan(1, 0);
        plan.duration_days = 4_294_967_280;
        assert_eq!(plan.end_date(Utc::now()), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_discount_scope_parsing() {
        assert_eq!("ALL".parse::<DiscountScope>().unwrap(), DiscountScope::All);
        assert_eq!("PLAN".parse::<DiscountScope>().unwrap(), DiscountScope::Plan);
        assert!("PLANS".parse::<DiscountScope>().is_err());
        assert_eq!(
            serde_json::to_string(&DiscountScope::Plan).unwrap(),
            "\"PLAN\""
        );
    }

    #[test]
    fn test_discount_validation() {
        let now = Utc::now();
        let later = now + Duration::days(1);
        let new = |pct| NewDiscount::new("X", "x", DiscountScope::All, pct, now, later);
        assert!(new(dec!(100)).is_ok());
        assert!(new(dec!(0)).is_err());
        assert!(new(dec!(100.5)).is_err());
        assert!(NewDiscount::new("X", "x", DiscountScope::All, dec!(5), later, now).is_err());
    }

    #[test]
    fn test_expired_wins_over_inactive_check() {
        let now = Utc::now();
        let discount = NewDiscount::new(
            "OLD",
            "old",
            DiscountScope::All,
            dec!(5),
            now - Duration::days(10),
            now - Duration::days(1),
        )
        .unwrap()
        .into_discount(1);

        assert!(discount.is_active(now));
        assert_eq!(discount.check_window(now), Err(DiscountError::Expired));
    }

    #[test]
    fn test_not_yet_active_discount() {
        let now = Utc::now();
        let discount = NewDiscount::new(
            "SOON",
            "soon",
            DiscountScope::All,
            dec!(5),
            now + Duration::days(1),
            now + Duration::days(10),
        )
        .unwrap()
        .into_discount(1);

        assert_eq!(discount.check_window(now), Err(DiscountError::Inactive));
    }

    #[test]
    fn test_only_plan_scoped_discounts_attach() {
        let now = Utc::now();
        let window = (now - Duration::days(1), now + Duration::days(1));
        let all = NewDiscount::new("A", "a", DiscountScope::All, dec!(5), window.0, window.1)
            .unwrap()
            .into_discount(1);
        let scoped = NewDiscount::new("P", "p", DiscountScope::Plan, dec!(5), window.0, window.1)
            .unwrap()
            .into_discount(2);

        assert!(all.check_attachable(now).is_err());
        assert!(scoped.check_attachable(now).is_ok());
    }
}
