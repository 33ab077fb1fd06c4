use crate::domain::subscription::{Subscription, SubscriptionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct SubscriptionRow {
    user: u64,
    plan: u64,
    status: SubscriptionStatus,
    remaining_days: Option<i64>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionRow {
    fn from(subscription: &Subscription) -> Self {
        Self {
            user: subscription.user_id,
            plan: subscription.plan_id,
            status: subscription.status,
            remaining_days: subscription.remaining_days,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
        }
    }
}

/// Writes subscriptions as CSV, one row per subscription with a header.
pub struct SubscriptionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SubscriptionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_subscriptions<'a>(
        &mut self,
        subscriptions: impl IntoIterator<Item = &'a Subscription>,
    ) -> csv::Result<()> {
        for subscription in subscriptions {
            self.writer.serialize(SubscriptionRow::from(subscription))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
