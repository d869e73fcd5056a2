//! Meta WhatsApp Cloud API client.

use async_trait::async_trait;
use log::debug;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;

use super::gateway::{api_error, MediaKind, OutgoingMedia, Provider, WhatsAppError, WhatsAppGateway};

pub struct CloudApiClient {
    client: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

impl CloudApiClient {
    pub fn new(client: reqwest::Client, base_url: String, phone_number_id: String, access_token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            phone_number_id,
            access_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.base_url, self.phone_number_id)
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, WhatsAppError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WhatsAppError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status, body));
        }
        serde_json::from_str(&body).map_err(|e| WhatsAppError::Parse(e.to_string()))
    }

    async fn post_message(&self, payload: serde_json::Value) -> Result<String, WhatsAppError> {
        let response = self
            .client
            .post(self.url("messages"))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Network(e.to_string()))?;

        let sent: SendResponse = Self::read(response).await?;
        sent.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| WhatsAppError::Parse("response has no message id".to_string()))
    }

    /// Uploads media and returns the media id to reference in a message.
    pub async fn upload_media(&self, media: &OutgoingMedia) -> Result<String, WhatsAppError> {
        let part = multipart::Part::bytes(media.bytes.clone())
            .file_name(media.file_name.clone())
            .mime_str(&media.mime_type)
            .map_err(|e| WhatsAppError::Parse(e.to_string()))?;
        let form = multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", media.mime_type.clone())
            .part("file", part);

        let response = self
            .client
            .post(self.url("media"))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| WhatsAppError::Network(e.to_string()))?;

        let uploaded: UploadResponse = Self::read(response).await?;
        debug!("Uploaded {} as media {}", media.file_name, uploaded.id);
        Ok(uploaded.id)
    }
}

#[async_trait]
impl WhatsAppGateway for CloudApiClient {
    fn provider(&self) -> Provider {
        Provider::Cloud
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<String, WhatsAppError> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body }
        }))
        .await
    }

    async fn send_media(&self, to: &str, media: OutgoingMedia) -> Result<String, WhatsAppError> {
        let media_id = self.upload_media(&media).await?;
        let kind = media.kind();

        let mut object = json!({ "id": media_id });
        if kind.accepts_caption() {
            if let Some(caption) = &media.caption {
                object["caption"] = json!(caption);
            }
        }
        if kind == MediaKind::Document {
            object["filename"] = json!(media.file_name);
        }

        let mut payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": kind.as_str()
        });
        payload[kind.as_str()] = object;
        self.post_message(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base: String) -> CloudApiClient {
        CloudApiClient::new(reqwest::Client::new(), base, "PN1".to_string(), "EAAG".to_string())
    }

    #[tokio::test]
    async fn test_send_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/PN1/messages")
            .match_header("authorization", "Bearer EAAG")
            .match_body(Matcher::PartialJson(json!({
                "to": "5511999990000",
                "type": "text",
                "text": {"body": "Olá"}
            })))
            .with_status(200)
            .with_body(r#"{"messaging_product":"whatsapp","messages":[{"id":"wamid.1"}]}"#)
            .create_async()
            .await;

        let id = client(server.url())
            .send_text("5511999990000", "Olá")
            .await
            .expect("sent");
        assert_eq!(id, "wamid.1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_media_uploads_then_references() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/PN1/media")
            .match_header("content-type", Matcher::Regex("multipart/form-data".to_string()))
            .with_status(200)
            .with_body(r#"{"id":"media-9"}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/PN1/messages")
            .match_body(Matcher::PartialJson(json!({
                "type": "image",
                "image": {"id": "media-9", "caption": "cardápio"}
            })))
            .with_status(200)
            .with_body(r#"{"messages":[{"id":"wamid.2"}]}"#)
            .create_async()
            .await;

        let media = OutgoingMedia {
            file_name: "menu.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
            caption: Some("cardápio".to_string()),
        };
        let id = client(server.url()).send_media("5511", media).await.expect("sent");
        assert_eq!(id, "wamid.2");
        upload.assert_async().await;
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_graph_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/PN1/messages")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Invalid OAuth access token","code":190}}"#)
            .create_async()
            .await;

        let err = client(server.url()).send_text("5511", "x").await.unwrap_err();
        assert!(matches!(err, WhatsAppError::Api { status: 401, ref message } if message == "Invalid OAuth access token"));
    }
}
