use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cloud_api::CloudApiClient;
use super::evolution::EvolutionClient;
use super::WhatsAppConnection;
use crate::shared::error::{CrmError, CrmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Cloud,
    Evolution,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Evolution => "evolution",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloud" => Ok(Self::Cloud),
            "evolution" => Ok(Self::Evolution),
            other => Err(CrmError::Internal(format!("Unknown WhatsApp provider: {other}"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("WhatsApp API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<WhatsAppError> for CrmError {
    fn from(e: WhatsAppError) -> Self {
        CrmError::integration("whatsapp", e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "image" => Self::Image,
            "audio" => Self::Audio,
            "video" => Self::Video,
            _ => Self::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    /// Voice notes cannot carry a caption.
    pub fn accepts_caption(&self) -> bool {
        !matches!(self, Self::Audio)
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

impl OutgoingMedia {
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }
}

/// Sends messages through one tenant's connection. Returns the provider's
/// message id.
#[async_trait]
pub trait WhatsAppGateway: Send + Sync {
    fn provider(&self) -> Provider;

    async fn send_text(&self, to: &str, body: &str) -> Result<String, WhatsAppError>;

    async fn send_media(&self, to: &str, media: OutgoingMedia) -> Result<String, WhatsAppError>;
}

pub fn build_gateway(
    http: reqwest::Client,
    connection: &WhatsAppConnection,
    graph_url: &str,
) -> CrmResult<Box<dyn WhatsAppGateway>> {
    match connection.provider.parse::<Provider>()? {
        Provider::Cloud => Ok(Box::new(CloudApiClient::new(
            http,
            connection.base_url.clone().unwrap_or_else(|| graph_url.to_string()),
            connection.external_id.clone(),
            connection.access_token.clone(),
        ))),
        Provider::Evolution => {
            let base_url = connection.base_url.clone().ok_or_else(|| {
                CrmError::Validation("Evolution connections need a base_url".to_string())
            })?;
            Ok(Box::new(EvolutionClient::new(
                http,
                base_url,
                connection.external_id.clone(),
                connection.access_token.clone(),
            )))
        }
    }
}

pub(crate) fn api_error(status: reqwest::StatusCode, body: String) -> WhatsAppError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.pointer("/response/message"))
                .or_else(|| v.get("message"))
                .map(|m| match m {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or(body);
    WhatsAppError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn connection(provider: &str, base_url: Option<&str>) -> WhatsAppConnection {
        let now = chrono::Utc::now();
        WhatsAppConnection {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            provider: provider.to_string(),
            external_id: "PN1".to_string(),
            access_token: "tok".to_string(),
            base_url: base_url.map(str::to_string),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert!(!MediaKind::Audio.accepts_caption());
    }

    #[test]
    fn test_build_gateway_per_provider() {
        let http = reqwest::Client::new();
        let cloud = build_gateway(http.clone(), &connection("cloud", None), "https://graph.test").expect("cloud");
        assert_eq!(cloud.provider(), Provider::Cloud);

        let evolution = build_gateway(http.clone(), &connection("evolution", Some("https://evo.test")), "")
            .expect("evolution");
        assert_eq!(evolution.provider(), Provider::Evolution);

        assert!(matches!(
            build_gateway(http, &connection("evolution", None), "").err(),
            Some(CrmError::Validation(_))
        ));
    }

    #[test]
    fn test_api_error_prefers_provider_message() {
        let err = api_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid parameter","code":100}}"#.to_string(),
        );
        assert_eq!(err.to_string(), "WhatsApp API error (400): Invalid parameter");
    }
}
