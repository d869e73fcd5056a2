//! Transactional email through the Resend HTTP API.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::error::CrmError;

const RESEND_API_URL: &str = "https://api.resend.com";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<EmailError> for CrmError {
    fn from(e: EmailError) -> Self {
        CrmError::integration("email", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentEmail {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct EmailClient {
    client: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
}

impl EmailClient {
    pub fn new(client: reqwest::Client, api_key: String, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
            base_url: RESEND_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, EmailError> {
        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(|e| EmailError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmailError::Network(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct ApiError {
                message: String,
            }
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(EmailError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let sent: SentEmail = serde_json::from_str(&body).map_err(|e| EmailError::Parse(e.to_string()))?;
        debug!("Email {} accepted for {} recipient(s)", sent.id, email.to.len());
        Ok(sent)
    }

    pub async fn send_invitation(
        &self,
        to: &str,
        organization: &str,
        invited_by: &str,
        accept_url: &str,
    ) -> Result<(), EmailError> {
        let email = invitation_email(&self.from, to, organization, invited_by, accept_url);
        let sent = self.send(&email).await?;
        info!("Invitation email {} sent", sent.id);
        Ok(())
    }
}

pub fn invitation_email(from: &str, to: &str, organization: &str, invited_by: &str, accept_url: &str) -> OutgoingEmail {
    let html = format!(
        "<p>{} invited you to join <strong>{}</strong>.</p>\
         <p><a href=\"{}\">Accept the invitation</a></p>\
         <p>The link expires in 7 days.</p>",
        escape_html(invited_by),
        escape_html(organization),
        escape_html(accept_url),
    );
    OutgoingEmail {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: format!("You were invited to {organization}"),
        html,
        reply_to: Some(invited_by.to_string()),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_body_escapes_names() {
        let email = invitation_email(
            "CRM <no-reply@crm.test>",
            "bia@example.com",
            "Bolos & <Cia>",
            "ana@example.com",
            "https://crm.test/invite/abc",
        );
        assert_eq!(email.to, vec!["bia@example.com"]);
        assert!(email.html.contains("Bolos &amp; &lt;Cia&gt;"));
        assert!(email.html.contains("https://crm.test/invite/abc"));
        assert!(!email.html.contains("<Cia>"));
    }

    #[tokio::test]
    async fn test_send_posts_to_resend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "to": ["bia@example.com"],
                "from": "CRM <no-reply@crm.test>"
            })))
            .with_status(200)
            .with_body(r#"{"id":"em_123"}"#)
            .create_async()
            .await;

        let client = EmailClient::new(
            reqwest::Client::new(),
            "re_test".to_string(),
            "CRM <no-reply@crm.test>".to_string(),
        )
        .with_base_url(server.url());

        client
            .send_invitation("bia@example.com", "Doces", "ana@example.com", "https://crm.test/invite/x")
            .await
            .expect("sent");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body(r#"{"statusCode":422,"message":"Invalid `from` field"}"#)
            .create_async()
            .await;

        let client = EmailClient::new(reqwest::Client::new(), "k".to_string(), "bad".to_string())
            .with_base_url(server.url());
        let err = client
            .send_invitation("x@example.com", "Org", "y@example.com", "https://crm.test")
            .await
            .unwrap_err();

        match err {
            EmailError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Invalid `from` field");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
