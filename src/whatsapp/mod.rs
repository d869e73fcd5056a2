//! WhatsApp messaging through either the Meta Cloud API or an Evolution API
//! gateway. Every inbound and outbound message is logged and linked to the
//! tenant's lead with the same phone number.

pub mod api;
pub mod cloud_api;
pub mod evolution;
pub mod gateway;
pub mod inbox;
pub mod types;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::shared::schema::{whatsapp_connections, whatsapp_messages};

pub use api::configure_whatsapp_routes;
pub use gateway::{build_gateway, Provider, WhatsAppError, WhatsAppGateway};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = whatsapp_connections)]
pub struct WhatsAppConnection {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: String,
    pub external_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub base_url: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = whatsapp_messages)]
pub struct WhatsAppMessage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub direction: String,
    pub provider: String,
    pub external_id: Option<String>,
    pub phone: String,
    pub body: Option<String>,
    pub media_type: Option<String>,
    pub sent_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
