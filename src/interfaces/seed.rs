//! JSON catalog seed used to populate plans and discounts before replaying checkouts.

use crate::application::catalog::Catalog;
use crate::domain::plan::{Currency, DiscountScope, NewDiscount, NewPlan};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub plans: Vec<PlanSeed>,
    #[serde(default)]
    pub discounts: Vec<DiscountSeed>,
}

#[derive(Debug, Deserialize)]
pub struct PlanSeed {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub currency: Currency,
    pub duration_days: u32,
}

#[derive(Debug, Deserialize)]
pub struct DiscountSeed {
    pub code: String,
    pub description: String,
    pub scope: DiscountScope,
    pub percentage: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Names of the plans a `PLAN` discount applies to.
    #[serde(default)]
    pub plans: Vec<String>,
}

impl CatalogSeed {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BillingError::InvalidArgument(format!("malformed catalog seed: {e}")))
    }

    /// Creates the seeded plans and discounts.
    ///
    /// Plans whose name already exists and discounts whose code already exists are left
    /// as they are, so a persistent catalog can be seeded more than once.
    pub async fn apply(&self, catalog: &Catalog) -> Result<()> {
        let mut plan_ids: HashMap<String, u64> = catalog
            .list_plans()
            .await?
            .into_iter()
            .map(|plan| (plan.name, plan.id))
            .collect();

        for seed in &self.plans {
            if plan_ids.contains_key(&seed.name) {
                continue;
            }
            let plan = catalog
                .create_plan(NewPlan::new(
                    &seed.name,
                    &seed.description,
                    seed.price,
                    seed.currency,
                    seed.duration_days,
                )?)
                .await?;
            plan_ids.insert(plan.name, plan.id);
        }

        for seed in &self.discounts {
            let new = NewDiscount::new(
                &seed.code,
                &seed.description,
                seed.scope,
                seed.percentage,
                seed.starts_at,
                seed.ends_at,
            )?;
            let discount = match catalog.create_discount(new).await {
                Ok(discount) => discount,
                Err(BillingError::Duplicate(_)) => {
                    info!(code = %seed.code, "discount already seeded");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if seed.plans.is_empty() {
                continue;
            }
            let ids = seed
                .plans
                .iter()
                .map(|name| plan_ids.get(name).copied().ok_or(BillingError::NotFound("plan")))
                .collect::<Result<Vec<u64>>>()?;
            if let Err(e) = catalog.attach_plans(discount.id, &ids).await {
                warn!(code = %seed.code, error = %e, "discount not attached");
            }
        }
        Ok(())
    }
}
