//! Evolution API gateway client. Media travels inline as base64.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;

use super::gateway::{api_error, OutgoingMedia, Provider, WhatsAppError, WhatsAppGateway};

pub struct EvolutionClient {
    client: reqwest::Client,
    base_url: String,
    instance: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    key: SentKey,
}

#[derive(Debug, Deserialize)]
struct SentKey {
    id: String,
}

impl EvolutionClient {
    pub fn new(client: reqwest::Client, base_url: String, instance: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            instance,
            api_key,
        }
    }

    async fn post(&self, action: &str, payload: serde_json::Value) -> Result<String, WhatsAppError> {
        let response = self
            .client
            .post(format!("{}/message/{action}/{}", self.base_url, self.instance))
            .header("apikey", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WhatsAppError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status, body));
        }
        let sent: SendResponse = serde_json::from_str(&body).map_err(|e| WhatsAppError::Parse(e.to_string()))?;
        Ok(sent.key.id)
    }
}

#[async_trait]
impl WhatsAppGateway for EvolutionClient {
    fn provider(&self) -> Provider {
        Provider::Evolution
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<String, WhatsAppError> {
        self.post("sendText", json!({ "number": to, "text": body })).await
    }

    async fn send_media(&self, to: &str, media: OutgoingMedia) -> Result<String, WhatsAppError> {
        let kind = media.kind();
        let mut payload = json!({
            "number": to,
            "mediatype": kind.as_str(),
            "mimetype": media.mime_type,
            "fileName": media.file_name,
            "media": STANDARD.encode(&media.bytes),
        });
        if kind.accepts_caption() {
            if let Some(caption) = media.caption {
                payload["caption"] = json!(caption);
            }
        }
        self.post("sendMedia", payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_send_text_uses_instance_and_apikey() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/message/sendText/loja")
            .match_header("apikey", "evo-key")
            .match_body(Matcher::Json(json!({"number": "5511988887777", "text": "Oi!"})))
            .with_status(201)
            .with_body(r#"{"key":{"remoteJid":"5511988887777@s.whatsapp.net","fromMe":true,"id":"BAE5"}}"#)
            .create_async()
            .await;

        let client = EvolutionClient::new(
            reqwest::Client::new(),
            format!("{}/", server.url()),
            "loja".to_string(),
            "evo-key".to_string(),
        );
        let id = client.send_text("5511988887777", "Oi!").await.expect("sent");
        assert_eq!(id, "BAE5");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_media_inlines_base64() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/message/sendMedia/loja")
            .match_body(Matcher::PartialJson(json!({
                "mediatype": "document",
                "fileName": "orcamento.pdf",
                "media": "JVBERg==",
                "caption": "segue"
            })))
            .with_status(201)
            .with_body(r#"{"key":{"id":"BAE6"}}"#)
            .create_async()
            .await;

        let client = EvolutionClient::new(reqwest::Client::new(), server.url(), "loja".to_string(), "k".to_string());
        let media = OutgoingMedia {
            file_name: "orcamento.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: b"%PDF".to_vec(),
            caption: Some("segue".to_string()),
        };
        assert_eq!(client.send_media("5511", media).await.expect("sent"), "BAE6");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_error_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/message/sendText/loja")
            .with_status(404)
            .with_body(r#"{"status":404,"error":"Not Found","response":{"message":["The \"loja\" instance does not exist"]}}"#)
            .create_async()
            .await;

        let client = EvolutionClient::new(reqwest::Client::new(), server.url(), "loja".to_string(), "k".to_string());
        match client.send_text("5511", "x").await.unwrap_err() {
            WhatsAppError::Api { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
