//! Tenant subscriptions backed by Stripe Checkout and the billing portal.

pub mod api;
pub mod stripe_integration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::subscriptions;

pub use api::configure_billing_routes;
pub use stripe_integration::{StripeClient, StripeError, WebhookAction};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = subscriptions)]
pub struct Subscription {
    pub id: Uuid,
    pub org_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and trialing subscriptions grant access. A canceled one keeps
    /// access until the end of the period already paid for.
    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        match self.status.as_str() {
            "active" | "trialing" => true,
            "canceled" | "past_due" => self.current_period_end.is_some_and(|end| end > now),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub subscription: Option<Subscription>,
    pub has_access: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: &str, period_end: Option<DateTime<Utc>>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            stripe_subscription_id: Some("sub_1".to_string()),
            stripe_customer_id: "cus_1".to_string(),
            status: status.to_string(),
            current_period_end: period_end,
            cancel_at_period_end: false,
            last_payment_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_access_by_status() {
        let now = Utc::now();
        assert!(subscription("active", None).has_access(now));
        assert!(subscription("trialing", None).has_access(now));
        assert!(!subscription("incomplete", None).has_access(now));
        assert!(!subscription("unpaid", Some(now + Duration::days(3))).has_access(now));
    }

    #[test]
    fn test_canceled_keeps_access_until_period_end() {
        let now = Utc::now();
        assert!(subscription("canceled", Some(now + Duration::days(2))).has_access(now));
        assert!(!subscription("canceled", Some(now - Duration::days(2))).has_access(now));
        assert!(!subscription("canceled", None).has_access(now));
    }
}
