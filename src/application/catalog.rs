use crate::domain::plan::{Discount, NewDiscount, NewPlan, Plan};
use crate::domain::ports::{DiscountRepositoryBox, PlanRepositoryBox};
use crate::error::{BillingError, DiscountError, Result};
use chrono::Utc;
use tracing::info;

/// Read model and administration for plans and discount codes.
pub struct Catalog {
    plans: PlanRepositoryBox,
    discounts: DiscountRepositoryBox,
}

impl Catalog {
    pub fn new(plans: PlanRepositoryBox, discounts: DiscountRepositoryBox) -> Self {
        Self { plans, discounts }
    }

    pub async fn get_plan(&self, id: u64) -> Result<Plan> {
        self.plans
            .get(id)
            .await?
            .ok_or(BillingError::NotFound("plan"))
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.plans.list().await
    }

    /// Resolves `code` for `plan_id` and checks its validity window.
    ///
    /// Expiry is checked before activation, so a code whose window has fully passed is
    /// reported as expired rather than inactive.
    pub async fn get_discount(&self, code: &str, plan_id: u64) -> Result<Discount> {
        if code.is_empty() {
            return Err(DiscountError::EmptyCode.into());
        }
        let discount = self
            .discounts
            .validate_and_get(code, plan_id)
            .await?
            .ok_or(DiscountError::Invalid)?;
        discount.check_window(Utc::now())?;
        Ok(discount)
    }

    pub async fn create_plan(&self, plan: NewPlan) -> Result<Plan> {
        let plan = self.plans.create(plan).await?;
        info!(plan_id = plan.id, name = %plan.name, "plan created");
        Ok(plan)
    }

    /// Replaces a plan's data. Existing transactions keep the price they were charged.
    pub async fn update_plan(&self, id: u64, plan: NewPlan, expected_version: u32) -> Result<Plan> {
        let plan = self.plans.update(id, plan, expected_version).await?;
        info!(plan_id = plan.id, version = plan.version, "plan updated");
        Ok(plan)
    }

    pub async fn create_discount(&self, discount: NewDiscount) -> Result<Discount> {
        let discount = self.discounts.create(discount).await?;
        info!(discount_id = discount.id, code = %discount.code, scope = %discount.scope, "discount created");
        Ok(discount)
    }

    /// Attaches a currently valid `PLAN`-scoped discount to plans.
    pub async fn attach_plans(&self, discount_id: u64, plan_ids: &[u64]) -> Result<()> {
        let discount = self
            .discounts
            .get(discount_id)
            .await?
            .ok_or(BillingError::NotFound("discount"))?;
        discount.check_attachable(Utc::now())?;
        self.discounts.attach_plans(discount_id, plan_ids).await?;
        info!(discount_id, ?plan_ids, "discount attached to plans");
        Ok(())
    }
}
