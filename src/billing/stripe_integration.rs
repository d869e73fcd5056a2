use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::security::webhook::{is_timestamp_fresh, verify_hex_signature, DEFAULT_TIMESTAMP_TOLERANCE_SECONDS};
use crate::shared::error::CrmError;

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_key: String,
    webhook_secret: Option<String>,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StripeSubscriptionStatus {
    Active,
    Canceled,
    Incomplete,
    IncompleteExpired,
    PastDue,
    Paused,
    Trialing,
    Unpaid,
}

impl StripeSubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Trialing => "trialing",
            Self::Unpaid => "unpaid",
        }
    }

    /// Whether the tenant currently has paid (or trial) access.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: StripeSubscriptionStatus,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: String,
    pub subscription: Option<String>,
    pub amount_paid: i64,
    pub currency: String,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeBillingPortalSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CreateCustomerParams {
    pub email: String,
    pub name: Option<String>,
    pub organization_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionParams {
    pub customer_id: String,
    pub price_id: String,
    pub organization_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookData,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeWebhookData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeError {
    ApiError(String),
    NetworkError(String),
    InvalidWebhook(String),
    ParseError(String),
    NotConfigured,
}

impl std::fmt::Display for StripeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiError(e) => write!(f, "Stripe API error: {e}"),
            Self::NetworkError(e) => write!(f, "Network error: {e}"),
            Self::InvalidWebhook(e) => write!(f, "Invalid webhook: {e}"),
            Self::ParseError(e) => write!(f, "Parse error: {e}"),
            Self::NotConfigured => write!(f, "Stripe webhook secret is not configured"),
        }
    }
}

impl std::error::Error for StripeError {}

impl From<StripeError> for CrmError {
    fn from(e: StripeError) -> Self {
        match e {
            StripeError::InvalidWebhook(msg) => CrmError::Validation(format!("Invalid webhook: {msg}")),
            StripeError::NotConfigured => CrmError::NotConfigured { service: "stripe webhooks" },
            other => CrmError::integration("stripe", other.to_string()),
        }
    }
}

/// What a verified webhook asks the subscription store to do.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    CheckoutCompleted {
        organization_id: Option<Uuid>,
        stripe_customer_id: Option<String>,
        stripe_subscription_id: Option<String>,
    },
    SubscriptionChanged {
        stripe_subscription_id: String,
        stripe_customer_id: String,
        status: StripeSubscriptionStatus,
        current_period_end: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
    },
    SubscriptionCanceled {
        stripe_subscription_id: String,
        stripe_customer_id: String,
    },
    PaymentSucceeded {
        stripe_customer_id: String,
        paid_at: DateTime<Utc>,
    },
    PaymentFailed {
        stripe_customer_id: String,
    },
    None,
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

impl StripeClient {
    pub fn new(client: reqwest::Client, api_key: String, webhook_secret: Option<String>) -> Self {
        Self {
            api_key,
            webhook_secret,
            client,
            base_url: STRIPE_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn create_customer(&self, params: CreateCustomerParams) -> Result<StripeCustomer, StripeError> {
        let mut form: Vec<(String, String)> = vec![("email".to_string(), params.email)];

        if let Some(name) = params.name {
            form.push(("name".to_string(), name));
        }
        form.push(("metadata[organization_id]".to_string(), params.organization_id.to_string()));

        self.post_form("customers", &form).await
    }

    pub async fn create_checkout_session(
        &self,
        params: CreateCheckoutSessionParams,
    ) -> Result<StripeCheckoutSession, StripeError> {
        let org = params.organization_id.to_string();
        let mut form: Vec<(String, String)> = vec![
            ("customer".to_string(), params.customer_id),
            ("mode".to_string(), "subscription".to_string()),
            ("success_url".to_string(), params.success_url),
            ("cancel_url".to_string(), params.cancel_url),
            ("line_items[0][price]".to_string(), params.price_id),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("client_reference_id".to_string(), org.clone()),
            ("metadata[organization_id]".to_string(), org.clone()),
            ("subscription_data[metadata][organization_id]".to_string(), org),
        ];

        if let Some(days) = params.trial_days.filter(|d| *d > 0) {
            form.push(("subscription_data[trial_period_days]".to_string(), days.to_string()));
        }

        self.post_form("checkout/sessions", &form).await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<StripeBillingPortalSession, StripeError> {
        let form: Vec<(String, String)> = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];

        self.post_form("billing_portal/sessions", &form).await
    }

    /// Checks a `Stripe-Signature` header (`t=...,v1=...`) against the raw
    /// body and parses the event. Any `v1` entry may match; Stripe sends
    /// several while a secret is being rolled.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> Result<StripeWebhookEvent, StripeError> {
        let webhook_secret = self
            .webhook_secret
            .as_ref()
            .ok_or(StripeError::NotConfigured)?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| StripeError::InvalidWebhook("Missing timestamp".to_string()))?;
        if candidates.is_empty() {
            return Err(StripeError::InvalidWebhook("Missing signature".to_string()));
        }

        let signed_payload = format!("{timestamp}.{payload}");
        let matched = candidates
            .iter()
            .any(|sig| verify_hex_signature(webhook_secret, signed_payload.as_bytes(), sig));
        if !matched {
            return Err(StripeError::InvalidWebhook("Signature mismatch".to_string()));
        }

        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| StripeError::InvalidWebhook("Invalid timestamp".to_string()))?;
        if !is_timestamp_fresh(timestamp, now, DEFAULT_TIMESTAMP_TOLERANCE_SECONDS) {
            return Err(StripeError::InvalidWebhook("Timestamp outside tolerance".to_string()));
        }

        serde_json::from_str(payload).map_err(|e| StripeError::ParseError(e.to_string()))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, StripeError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(form)
            .send()
            .await
            .map_err(|e| StripeError::NetworkError(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, StripeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StripeError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct StripeApiError {
                error: StripeApiErrorDetail,
            }

            #[derive(Deserialize)]
            struct StripeApiErrorDetail {
                message: String,
            }

            if let Ok(error) = serde_json::from_str::<StripeApiError>(&body) {
                return Err(StripeError::ApiError(error.error.message));
            }

            return Err(StripeError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        serde_json::from_str(&body).map_err(|e| StripeError::ParseError(e.to_string()))
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &StripeWebhookEvent) -> Result<T, StripeError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| StripeError::ParseError(e.to_string()))
}

/// Maps a verified event onto the subscription change it implies. Event
/// types we do not track map to [`WebhookAction::None`].
pub fn webhook_action(event: &StripeWebhookEvent) -> Result<WebhookAction, StripeError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = parse_object(event)?;
            let organization_id = session
                .client_reference_id
                .as_deref()
                .or_else(|| session.metadata.get("organization_id").map(String::as_str))
                .and_then(|raw| Uuid::parse_str(raw).ok());
            Ok(WebhookAction::CheckoutCompleted {
                organization_id,
                stripe_customer_id: session.customer,
                stripe_subscription_id: session.subscription,
            })
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let sub: StripeSubscription = parse_object(event)?;
            Ok(WebhookAction::SubscriptionChanged {
                stripe_subscription_id: sub.id,
                stripe_customer_id: sub.customer,
                status: sub.status,
                current_period_end: sub.current_period_end.and_then(timestamp),
                cancel_at_period_end: sub.cancel_at_period_end,
            })
        }
        "customer.subscription.deleted" => {
            let sub: StripeSubscription = parse_object(event)?;
            Ok(WebhookAction::SubscriptionCanceled {
                stripe_subscription_id: sub.id,
                stripe_customer_id: sub.customer,
            })
        }
        "invoice.paid" => {
            let invoice: StripeInvoice = parse_object(event)?;
            Ok(WebhookAction::PaymentSucceeded {
                stripe_customer_id: invoice.customer,
                paid_at: timestamp(invoice.created).unwrap_or_else(Utc::now),
            })
        }
        "invoice.payment_failed" => {
            let invoice: StripeInvoice = parse_object(event)?;
            Ok(WebhookAction::PaymentFailed {
                stripe_customer_id: invoice.customer,
            })
        }
        other => {
            debug!("Unhandled Stripe webhook event: {other}");
            Ok(WebhookAction::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::webhook::sign_hex;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn client() -> StripeClient {
        StripeClient::new(reqwest::Client::new(), "sk_test".to_string(), Some(SECRET.to_string()))
    }

    fn header_for(payload: &str, t: i64) -> String {
        let sig = sign_hex(SECRET, format!("{t}.{payload}").as_bytes());
        format!("t={t},v1={sig}")
    }

    fn event(event_type: &str, object: serde_json::Value) -> String {
        json!({"id": "evt_1", "type": event_type, "created": 1_700_000_000, "data": {"object": object}}).to_string()
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let payload = event("invoice.paid", json!({}));
        let now = 1_700_000_100;
        let parsed = client()
            .verify_webhook_signature(&payload, &header_for(&payload, now - 10), now)
            .expect("verified");
        assert_eq!(parsed.event_type, "invoice.paid");
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let payload = event("invoice.paid", json!({}));
        let now = 1_700_000_100;
        let good = sign_hex(SECRET, format!("{now}.{payload}").as_bytes());
        let rolled = sign_hex("whsec_old", format!("{now}.{payload}").as_bytes());
        let header = format!("t={now},v1={rolled},v1={good}");
        assert!(client().verify_webhook_signature(&payload, &header, now).is_ok());
    }

    #[test]
    fn test_tampered_or_stale_payload_is_rejected() {
        let payload = event("invoice.paid", json!({}));
        let now = 1_700_000_100;
        let header = header_for(&payload, now);

        let tampered = payload.replace("evt_1", "evt_2");
        assert_eq!(
            client().verify_webhook_signature(&tampered, &header, now),
            Err(StripeError::InvalidWebhook("Signature mismatch".to_string()))
        );

        let stale = header_for(&payload, now - DEFAULT_TIMESTAMP_TOLERANCE_SECONDS - 1);
        assert!(matches!(
            client().verify_webhook_signature(&payload, &stale, now),
            Err(StripeError::InvalidWebhook(_))
        ));

        assert!(client().verify_webhook_signature(&payload, "v1=abc", now).is_err());
    }

    #[test]
    fn test_missing_secret_is_not_configured() {
        let client = StripeClient::new(reqwest::Client::new(), "sk".to_string(), None);
        assert_eq!(
            client.verify_webhook_signature("{}", "t=1,v1=00", 1),
            Err(StripeError::NotConfigured)
        );
    }

    #[test]
    fn test_checkout_event_resolves_organization() {
        let org = Uuid::new_v4();
        let raw = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "customer": "cus_1", "subscription": "sub_1", "client_reference_id": org.to_string()}),
        );
        let parsed: StripeWebhookEvent = serde_json::from_str(&raw).expect("event");
        assert_eq!(
            webhook_action(&parsed).expect("action"),
            WebhookAction::CheckoutCompleted {
                organization_id: Some(org),
                stripe_customer_id: Some("cus_1".to_string()),
                stripe_subscription_id: Some("sub_1".to_string()),
            }
        );
    }

    #[test]
    fn test_subscription_update_maps_status_and_period() {
        let raw = event(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "past_due",
                "current_period_end": 1_700_086_400,
                "cancel_at_period_end": true
            }),
        );
        let parsed: StripeWebhookEvent = serde_json::from_str(&raw).expect("event");
        match webhook_action(&parsed).expect("action") {
            WebhookAction::SubscriptionChanged {
                status,
                current_period_end,
                cancel_at_period_end,
                ..
            } => {
                assert_eq!(status, StripeSubscriptionStatus::PastDue);
                assert!(!status.grants_access());
                assert_eq!(current_period_end.map(|d| d.timestamp()), Some(1_700_086_400));
                assert!(cancel_at_period_end);
            }
            other => panic!("unexpected action: {other:?}"),
        }

        let unknown: StripeWebhookEvent =
            serde_json::from_str(&event("charge.refunded", json!({}))).expect("event");
        assert_eq!(webhook_action(&unknown).expect("action"), WebhookAction::None);
    }

    #[tokio::test]
    async fn test_checkout_session_request_is_form_encoded() {
        let mut server = mockito::Server::new_async().await;
        let org = Uuid::new_v4();
        let mock = server
            .mock("POST", "/checkout/sessions")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("mode".into(), "subscription".into()),
                mockito::Matcher::UrlEncoded("subscription_data[trial_period_days]".into(), "14".into()),
                mockito::Matcher::UrlEncoded("client_reference_id".into(), org.to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"cs_1","url":"https://checkout.stripe.test/cs_1","customer":"cus_1"}"#)
            .create_async()
            .await;

        let session = client()
            .with_base_url(server.url())
            .create_checkout_session(CreateCheckoutSessionParams {
                customer_id: "cus_1".to_string(),
                price_id: "price_1".to_string(),
                organization_id: org,
                success_url: "https://crm.test/ok".to_string(),
                cancel_url: "https://crm.test/cancel".to_string(),
                trial_days: Some(14),
            })
            .await
            .expect("session");

        assert_eq!(session.url.as_deref(), Some("https://checkout.stripe.test/cs_1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/customers")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid email address"}}"#)
            .create_async()
            .await;

        let err = client()
            .with_base_url(server.url())
            .create_customer(CreateCustomerParams {
                email: "bad".to_string(),
                name: None,
                organization_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, StripeError::ApiError("Invalid email address".to_string()));
    }
}
