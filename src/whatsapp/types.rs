//! Webhook payloads of both providers and their normalisation into
//! [`InboundMessage`].

use serde::{Deserialize, Serialize};

use crate::shared::utils::normalize_phone;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerifyQuery {
    /// Returns the challenge to echo when the handshake is valid.
    pub fn challenge_for(&self, expected_token: &str) -> Option<&str> {
        match (&self.mode, &self.verify_token, &self.challenge) {
            (Some(mode), Some(token), Some(challenge))
                if mode == "subscribe" && !expected_token.is_empty() && token == expected_token =>
            {
                Some(challenge)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CloudWebhook {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<CloudEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CloudEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<CloudChange>,
}

#[derive(Debug, Deserialize)]
pub struct CloudChange {
    pub field: String,
    pub value: CloudValue,
}

#[derive(Debug, Deserialize)]
pub struct CloudValue {
    pub metadata: CloudMetadata,
    #[serde(default)]
    pub contacts: Vec<CloudContact>,
    #[serde(default)]
    pub messages: Vec<CloudMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CloudMetadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudContact {
    pub wa_id: String,
    pub profile: Option<CloudProfile>,
}

#[derive(Debug, Deserialize)]
pub struct CloudProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: Option<CloudText>,
    pub image: Option<CloudMedia>,
    pub audio: Option<CloudMedia>,
    pub video: Option<CloudMedia>,
    pub document: Option<CloudMedia>,
}

#[derive(Debug, Deserialize)]
pub struct CloudText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudMedia {
    pub id: String,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EvolutionWebhook {
    pub event: String,
    pub instance: Option<String>,
    pub apikey: Option<String>,
    pub data: Option<EvolutionMessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionMessageData {
    pub key: EvolutionKey,
    pub push_name: Option<String>,
    pub message: Option<EvolutionContent>,
    pub message_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionKey {
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<EvolutionExtendedText>,
    pub image_message: Option<EvolutionMediaMessage>,
    pub video_message: Option<EvolutionMediaMessage>,
    pub audio_message: Option<EvolutionMediaMessage>,
    pub document_message: Option<EvolutionMediaMessage>,
}

#[derive(Debug, Deserialize)]
pub struct EvolutionExtendedText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EvolutionMediaMessage {
    pub caption: Option<String>,
}

/// A provider-independent inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub external_id: String,
    pub phone: String,
    pub contact_name: Option<String>,
    pub body: Option<String>,
    pub media_type: Option<String>,
}

/// Cloud API messages grouped with the phone number id they were sent to.
pub fn cloud_inbound(webhook: &CloudWebhook) -> Vec<(String, InboundMessage)> {
    let mut out = Vec::new();
    for change in webhook.entry.iter().flat_map(|e| &e.changes) {
        if change.field != "messages" {
            continue;
        }
        let value = &change.value;
        for message in &value.messages {
            let contact_name = value
                .contacts
                .iter()
                .find(|c| c.wa_id == message.from)
                .and_then(|c| c.profile.as_ref())
                .map(|p| p.name.clone());

            let (body, media_type) = match message.message_type.as_str() {
                "text" => (message.text.as_ref().map(|t| t.body.clone()), None),
                kind => {
                    let media = match kind {
                        "image" => message.image.as_ref(),
                        "audio" => message.audio.as_ref(),
                        "video" => message.video.as_ref(),
                        "document" => message.document.as_ref(),
                        _ => None,
                    };
                    (
                        media.and_then(|m| m.caption.clone()),
                        Some(kind.to_string()),
                    )
                }
            };

            out.push((
                value.metadata.phone_number_id.clone(),
                InboundMessage {
                    external_id: message.id.clone(),
                    phone: normalize_phone(&message.from),
                    contact_name,
                    body,
                    media_type,
                },
            ));
        }
    }
    out
}

/// Only `messages.upsert` from a contact is inbound. Our own echoes and group
/// chats are dropped.
pub fn evolution_inbound(webhook: &EvolutionWebhook) -> Option<InboundMessage> {
    if !matches!(webhook.event.as_str(), "messages.upsert" | "MESSAGES_UPSERT") {
        return None;
    }
    let data = webhook.data.as_ref()?;
    if data.key.from_me {
        return None;
    }
    let (user, domain) = data.key.remote_jid.split_once('@')?;
    if domain != "s.whatsapp.net" {
        return None;
    }

    let content = data.message.as_ref();
    let text = content.and_then(|c| {
        c.conversation
            .clone()
            .or_else(|| c.extended_text_message.as_ref().map(|t| t.text.clone()))
    });
    let media = content.and_then(|c| {
        [
            ("image", &c.image_message),
            ("video", &c.video_message),
            ("audio", &c.audio_message),
            ("document", &c.document_message),
        ]
        .into_iter()
        .find_map(|(kind, m)| m.as_ref().map(|m| (kind, m.caption.clone())))
    });

    let (body, media_type) = match media {
        Some((kind, caption)) => (caption.or(text), Some(kind.to_string())),
        None => (text, None),
    };

    Some(InboundMessage {
        external_id: data.key.id.clone(),
        phone: normalize_phone(user),
        contact_name: data.push_name.clone(),
        body,
        media_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verify_handshake() {
        let query = VerifyQuery {
            mode: Some("subscribe".to_string()),
            verify_token: Some("tok".to_string()),
            challenge: Some("123".to_string()),
        };
        assert_eq!(query.challenge_for("tok"), Some("123"));
        assert_eq!(query.challenge_for("other"), None);
        assert_eq!(query.challenge_for(""), None);
    }

    #[test]
    fn test_cloud_payload_normalises() {
        let webhook: CloudWebhook = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "5511", "phone_number_id": "PN1"},
                        "contacts": [{"wa_id": "5511999990000", "profile": {"name": "Bia"}}],
                        "messages": [
                            {"id": "m1", "from": "5511999990000", "timestamp": "1", "type": "text", "text": {"body": "oi"}},
                            {"id": "m2", "from": "5511999990000", "timestamp": "2", "type": "image", "image": {"id": "img", "caption": "bolo"}}
                        ]
                    }
                }]
            }]
        }))
        .expect("parse");

        let messages = cloud_inbound(&webhook);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "PN1");
        assert_eq!(messages[0].1.body.as_deref(), Some("oi"));
        assert_eq!(messages[0].1.contact_name.as_deref(), Some("Bia"));
        assert_eq!(messages[1].1.media_type.as_deref(), Some("image"));
        assert_eq!(messages[1].1.body.as_deref(), Some("bolo"));
    }

    #[test]
    fn test_cloud_status_updates_are_ignored() {
        let webhook: CloudWebhook = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "waba", "changes": [{
                "field": "messages",
                "value": {"metadata": {"phone_number_id": "PN1"}, "statuses": [{"id": "m1"}]}
            }]}]
        }))
        .expect("parse");
        assert!(cloud_inbound(&webhook).is_empty());
    }

    #[test]
    fn test_evolution_upsert() {
        let webhook: EvolutionWebhook = serde_json::from_value(json!({
            "event": "messages.upsert",
            "instance": "loja",
            "data": {
                "key": {"remoteJid": "5511988887777@s.whatsapp.net", "fromMe": false, "id": "ABC"},
                "pushName": "Carla",
                "message": {"conversation": "quero um bolo"},
                "messageType": "conversation"
            }
        }))
        .expect("parse");

        let message = evolution_inbound(&webhook).expect("inbound");
        assert_eq!(message.phone, "5511988887777");
        assert_eq!(message.body.as_deref(), Some("quero um bolo"));
        assert_eq!(message.contact_name.as_deref(), Some("Carla"));
        assert_eq!(message.media_type, None);
    }

    #[test]
    fn test_evolution_skips_own_and_group_messages() {
        let own: EvolutionWebhook = serde_json::from_value(json!({
            "event": "messages.upsert",
            "data": {"key": {"remoteJid": "5511@s.whatsapp.net", "fromMe": true, "id": "1"}}
        }))
        .expect("parse");
        assert!(evolution_inbound(&own).is_none());

        let group: EvolutionWebhook = serde_json::from_value(json!({
            "event": "messages.upsert",
            "data": {"key": {"remoteJid": "1203630@g.us", "fromMe": false, "id": "2"}}
        }))
        .expect("parse");
        assert!(evolution_inbound(&group).is_none());

        let other: EvolutionWebhook = serde_json::from_value(json!({
            "event": "connection.update",
            "data": null
        }))
        .expect("parse");
        assert!(evolution_inbound(&other).is_none());
    }
}
