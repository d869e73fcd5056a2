use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::stripe_integration::{webhook_action, CreateCheckoutSessionParams, CreateCustomerParams, StripeClient, WebhookAction};
use super::{Subscription, SubscriptionView};
use crate::security::auth::AuthUser;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{organizations, subscriptions};
use crate::shared::state::AppState;
use crate::shared::utils::interact;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortalRequest {
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

pub fn configure_billing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/billing/subscription", get(get_subscription))
        .route("/api/billing/checkout", post(create_checkout))
        .route("/api/billing/portal", post(create_portal))
        .route("/webhook/stripe", post(stripe_webhook))
}

fn stripe(state: &AppState) -> CrmResult<&StripeClient> {
    state
        .stripe
        .as_ref()
        .ok_or(CrmError::NotConfigured { service: "stripe" })
}

async fn get_subscription(State(state): State<Arc<AppState>>, user: AuthUser) -> CrmResult<Json<SubscriptionView>> {
    let org_id = user.org_id;
    let subscription = interact(&state.conn, move |conn| {
        let row = subscriptions::table
            .filter(subscriptions::org_id.eq(org_id))
            .select(Subscription::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    })
    .await?;

    let has_access = subscription.as_ref().is_some_and(|s| s.has_access(Utc::now()));
    Ok(Json(SubscriptionView {
        subscription,
        has_access,
    }))
}

/// Returns the tenant's Stripe customer, creating it on first use.
async fn ensure_customer(state: &AppState, client: &StripeClient, user: &AuthUser) -> CrmResult<String> {
    let org_id = user.org_id;
    let (name, existing) = interact(&state.conn, move |conn| {
        let row: (String, Option<String>) = organizations::table
            .find(org_id)
            .select((organizations::name, organizations::stripe_customer_id))
            .first(conn)?;
        Ok(row)
    })
    .await?;
    if let Some(customer_id) = existing {
        return Ok(customer_id);
    }

    let customer = client
        .create_customer(CreateCustomerParams {
            email: user.email.clone(),
            name: Some(name),
            organization_id: org_id,
        })
        .await?;

    let customer_id = customer.id.clone();
    interact(&state.conn, move |conn| {
        diesel::update(organizations::table.find(org_id))
            .set((
                organizations::stripe_customer_id.eq(Some(customer_id)),
                organizations::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    info!("Stripe customer {} created for org {org_id}", customer.id);
    Ok(customer.id)
}

async fn create_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<CheckoutRequest>>,
) -> CrmResult<Json<RedirectResponse>> {
    user.require_admin()?;
    let client = stripe(&state)?;
    let settings = state
        .config
        .stripe
        .as_ref()
        .ok_or(CrmError::NotConfigured { service: "stripe" })?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let base = state.config.server.base_url.trim_end_matches('/');

    let customer_id = ensure_customer(&state, client, &user).await?;
    let session = client
        .create_checkout_session(CreateCheckoutSessionParams {
            customer_id,
            price_id: settings.price_id.clone(),
            organization_id: user.org_id,
            success_url: req
                .success_url
                .unwrap_or_else(|| format!("{base}/billing?checkout=success")),
            cancel_url: req
                .cancel_url
                .unwrap_or_else(|| format!("{base}/billing?checkout=cancel")),
            trial_days: settings.trial_days,
        })
        .await?;

    let url = session
        .url
        .ok_or_else(|| CrmError::integration("stripe", "checkout session has no url"))?;
    Ok(Json(RedirectResponse { url }))
}

async fn create_portal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<PortalRequest>>,
) -> CrmResult<Json<RedirectResponse>> {
    user.require_admin()?;
    let client = stripe(&state)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let org_id = user.org_id;

    let customer_id = interact(&state.conn, move |conn| {
        let id: Option<String> = organizations::table
            .find(org_id)
            .select(organizations::stripe_customer_id)
            .first(conn)?;
        Ok(id)
    })
    .await?
    .ok_or_else(|| CrmError::Validation("Organization has no billing account yet".to_string()))?;

    let return_url = req
        .return_url
        .unwrap_or_else(|| format!("{}/billing", state.config.server.base_url.trim_end_matches('/')));
    let session = client.create_portal_session(&customer_id, &return_url).await?;
    Ok(Json(RedirectResponse { url: session.url }))
}

fn org_for_customer(conn: &mut PgConnection, customer_id: &str) -> QueryResult<Option<Uuid>> {
    organizations::table
        .filter(organizations::stripe_customer_id.eq(customer_id))
        .select(organizations::id)
        .first(conn)
        .optional()
}

/// Applies a webhook action. Returns `false` when the event refers to a
/// customer this server does not know.
fn apply_action(conn: &mut PgConnection, action: WebhookAction) -> CrmResult<bool> {
    let now = Utc::now();
    match action {
        WebhookAction::CheckoutCompleted {
            organization_id,
            stripe_customer_id,
            stripe_subscription_id,
        } => {
            let (Some(org_id), Some(customer_id)) = (organization_id, stripe_customer_id) else {
                return Ok(false);
            };
            let row = Subscription {
                id: Uuid::new_v4(),
                org_id,
                stripe_subscription_id: stripe_subscription_id.clone(),
                stripe_customer_id: customer_id.clone(),
                status: "incomplete".to_string(),
                current_period_end: None,
                cancel_at_period_end: false,
                last_payment_at: None,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(subscriptions::table)
                .values(&row)
                .on_conflict(subscriptions::org_id)
                .do_update()
                .set((
                    subscriptions::stripe_customer_id.eq(customer_id),
                    subscriptions::stripe_subscription_id.eq(stripe_subscription_id),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(true)
        }
        WebhookAction::SubscriptionChanged {
            stripe_subscription_id,
            stripe_customer_id,
            status,
            current_period_end,
            cancel_at_period_end,
        } => {
            let Some(org_id) = org_for_customer(conn, &stripe_customer_id)? else {
                return Ok(false);
            };
            let row = Subscription {
                id: Uuid::new_v4(),
                org_id,
                stripe_subscription_id: Some(stripe_subscription_id.clone()),
                stripe_customer_id: stripe_customer_id.clone(),
                status: status.as_str().to_string(),
                current_period_end,
                cancel_at_period_end,
                last_payment_at: None,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(subscriptions::table)
                .values(&row)
                .on_conflict(subscriptions::org_id)
                .do_update()
                .set((
                    subscriptions::stripe_subscription_id.eq(Some(stripe_subscription_id)),
                    subscriptions::stripe_customer_id.eq(stripe_customer_id),
                    subscriptions::status.eq(status.as_str()),
                    subscriptions::current_period_end.eq(current_period_end),
                    subscriptions::cancel_at_period_end.eq(cancel_at_period_end),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(true)
        }
        WebhookAction::SubscriptionCanceled {
            stripe_subscription_id,
            stripe_customer_id,
        } => {
            let updated = diesel::update(
                subscriptions::table
                    .filter(subscriptions::stripe_customer_id.eq(&stripe_customer_id))
                    .filter(subscriptions::stripe_subscription_id.eq(&stripe_subscription_id)),
            )
            .set((
                subscriptions::status.eq("canceled"),
                subscriptions::updated_at.eq(now),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        }
        WebhookAction::PaymentSucceeded {
            stripe_customer_id,
            paid_at,
        } => {
            let updated = diesel::update(subscriptions::table.filter(subscriptions::stripe_customer_id.eq(&stripe_customer_id)))
                .set((
                    subscriptions::last_payment_at.eq(Some(paid_at)),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(updated > 0)
        }
        WebhookAction::PaymentFailed { stripe_customer_id } => {
            let updated = diesel::update(subscriptions::table.filter(subscriptions::stripe_customer_id.eq(&stripe_customer_id)))
                .set((
                    subscriptions::status.eq("past_due"),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(updated > 0)
        }
        WebhookAction::None => Ok(true),
    }
}

/// Unknown customers are acknowledged with 200 so Stripe stops retrying.
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> CrmResult<(StatusCode, Json<serde_json::Value>)> {
    let client = stripe(&state)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CrmError::Validation("Missing Stripe-Signature header".to_string()))?;

    let event = client.verify_webhook_signature(&body, signature, Utc::now().timestamp())?;
    let action = webhook_action(&event)?;
    let event_id = event.id.clone();

    let applied = interact(&state.conn, move |conn| apply_action(conn, action)).await?;
    if applied {
        info!("Stripe event {} ({}) applied", event_id, event.event_type);
    } else {
        warn!("Stripe event {} ({}) refers to an unknown customer", event_id, event.event_type);
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "received": true }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::webhook::sign_hex;
    use crate::shared::test_utils::TestContext;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/webhook/stripe");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn with_stripe(ctx: TestContext) -> TestContext {
        ctx.map_state(|state| {
            state.stripe = Some(StripeClient::new(
                reqwest::Client::new(),
                "sk_test".to_string(),
                Some("whsec_test".to_string()),
            ));
        })
    }

    #[tokio::test]
    async fn test_webhook_without_stripe_is_unavailable() {
        let ctx = TestContext::new();
        let response = configure_billing_routes()
            .with_state(ctx.state.clone())
            .oneshot(webhook_request("{}", Some("t=1,v1=00".to_string())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let ctx = with_stripe(TestContext::new());
        let body = r#"{"id":"evt_1","type":"invoice.paid","created":1,"data":{"object":{}}}"#;
        let t = Utc::now().timestamp();
        let signature = format!("t={t},v1={}", sign_hex("wrong-secret", format!("{t}.{body}").as_bytes()));

        let response = configure_billing_routes()
            .with_state(ctx.state.clone())
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = configure_billing_routes()
            .with_state(ctx.state.clone())
            .oneshot(webhook_request(body, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_needs_stripe() {
        let ctx = TestContext::new();
        let response = configure_billing_routes()
            .with_state(ctx.state.clone())
            .oneshot(ctx.json_request("POST", "/api/billing/checkout", serde_json::json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
