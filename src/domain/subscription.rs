use crate::domain::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Expired => "EXPIRED",
        })
    }
}

/// A user's entitlement window to a plan.
///
/// Subscriptions are never deleted: replaced ones are kept as `Paused` and lapsed ones as
/// `Expired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: u64,
    pub plan_id: u64,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Days left on the term when it was paused.
    pub remaining_days: Option<i64>,
    pub version: u32,
}

impl Subscription {
    /// Starts a fresh active term of `plan` for `user_id` at `now`.
    pub fn new(user_id: u64, plan: &Plan, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: plan.end_date(now),
            paused_at: None,
            remaining_days: None,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    /// Whole days left until `end_date`, counting a started day as a full one.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        let seconds = (self.end_date - now).num_seconds();
        if seconds <= 0 {
            0
        } else {
            (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.remaining_days = Some(self.days_left(now));
        self.paused_at = Some(now);
        self.status = SubscriptionStatus::Paused;
    }

    pub fn expire(&mut self) {
        self.status = SubscriptionStatus::Expired;
    }
}
