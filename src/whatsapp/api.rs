use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::gateway::{build_gateway, OutgoingMedia, Provider};
use super::types::{cloud_inbound, evolution_inbound, CloudWebhook, EvolutionWebhook, InboundMessage, VerifyQuery};
use super::inbox::{self, PgMessageLog};
use super::{Direction, WhatsAppConnection, WhatsAppMessage};
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::security::webhook::{constant_time_compare, verify_hex_signature};
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{whatsapp_connections, whatsapp_messages};
use crate::shared::state::AppState;
use crate::shared::utils::{interact, normalize_phone};

pub const MAX_MEDIA_BYTES: usize = 16 * 1024 * 1024;
const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub provider: Provider,
    pub external_id: String,
    pub access_token: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub lead_id: Option<Uuid>,
    pub phone: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub lead_id: Option<Uuid>,
    pub phone: Option<String>,
    pub limit: Option<i64>,
}

pub fn configure_whatsapp_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/whatsapp/connection",
            get(get_connection).put(save_connection),
        )
        .route("/api/whatsapp/send", post(send_text))
        .route(
            "/api/whatsapp/send-media",
            post(send_media).layer(DefaultBodyLimit::max(MAX_MEDIA_BYTES + 64 * 1024)),
        )
        .route("/api/whatsapp/messages", get(list_messages))
        .route(
            "/webhook/whatsapp/cloud",
            get(verify_cloud_webhook).post(cloud_webhook),
        )
        .route("/webhook/whatsapp/evolution/:instance", post(evolution_webhook))
}

fn org_connection(conn: &mut PgConnection, org_id: Uuid) -> CrmResult<WhatsAppConnection> {
    whatsapp_connections::table
        .filter(whatsapp_connections::org_id.eq(org_id))
        .select(WhatsAppConnection::as_select())
        .first(conn)
        .optional()?
        .ok_or(CrmError::not_found("WhatsApp connection"))
}

fn connection_for(conn: &mut PgConnection, provider: Provider, external_id: &str) -> QueryResult<Option<WhatsAppConnection>> {
    whatsapp_connections::table
        .filter(whatsapp_connections::provider.eq(provider.as_str()))
        .filter(whatsapp_connections::external_id.eq(external_id))
        .select(WhatsAppConnection::as_select())
        .first(conn)
        .optional()
}

async fn get_connection(State(state): State<Arc<AppState>>, user: AuthUser) -> CrmResult<Json<WhatsAppConnection>> {
    let org_id = user.org_id;
    let connection = interact(&state.conn, move |conn| org_connection(conn, org_id)).await?;
    Ok(Json(connection))
}

/// Each tenant has at most one connection; saving replaces it.
async fn save_connection(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ConnectionRequest>,
) -> CrmResult<Json<WhatsAppConnection>> {
    user.require_admin()?;
    let external_id = req.external_id.trim().to_string();
    let access_token = req.access_token.trim().to_string();
    let base_url = req
        .base_url
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty());

    Validator::new()
        .string_required(&external_id, "external_id")
        .string_required(&access_token, "access_token")
        .validate()?;
    if req.provider == Provider::Evolution && base_url.is_none() {
        return Err(CrmError::Validation(
            "Evolution connections need a base_url".to_string(),
        ));
    }

    let org_id = user.org_id;
    let user_id = user.user_id;
    let provider = req.provider;
    let connection = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            if let Some(taken) = connection_for(conn, provider, &external_id)? {
                if taken.org_id != org_id {
                    return Err(CrmError::Conflict(
                        "This number is connected to another organization".to_string(),
                    ));
                }
            }

            let now = Utc::now();
            let existing = whatsapp_connections::table
                .filter(whatsapp_connections::org_id.eq(org_id))
                .select(whatsapp_connections::id)
                .for_update()
                .first::<Uuid>(conn)
                .optional()?;

            let saved = match existing {
                Some(id) => diesel::update(whatsapp_connections::table.find(id))
                    .set((
                        whatsapp_connections::provider.eq(provider.as_str()),
                        whatsapp_connections::external_id.eq(&external_id),
                        whatsapp_connections::access_token.eq(&access_token),
                        whatsapp_connections::base_url.eq(&base_url),
                        whatsapp_connections::updated_at.eq(now),
                    ))
                    .returning(WhatsAppConnection::as_returning())
                    .get_result(conn)?,
                None => diesel::insert_into(whatsapp_connections::table)
                    .values(&WhatsAppConnection {
                        id: Uuid::new_v4(),
                        org_id,
                        provider: provider.as_str().to_string(),
                        external_id: external_id.clone(),
                        access_token: access_token.clone(),
                        base_url: base_url.clone(),
                        created_by: user_id,
                        created_at: now,
                        updated_at: now,
                    })
                    .returning(WhatsAppConnection::as_returning())
                    .get_result(conn)?,
            };
            Ok(saved)
        })
    })
    .await?;

    info!("WhatsApp connection {} saved for org {org_id} ({})", connection.id, connection.provider);
    Ok(Json(connection))
}

/// Resolves the destination phone, from the lead when one is given.
async fn resolve_recipient(
    state: &AppState,
    user: &AuthUser,
    lead_id: Option<Uuid>,
    phone: Option<String>,
) -> CrmResult<(String, Option<Uuid>)> {
    if let Some(lead_id) = lead_id {
        let lead = state.leads.get(user.org_id, lead_id).await?;
        let phone = lead
            .phone
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CrmError::Validation("Lead has no phone number".to_string()))?;
        return Ok((phone, Some(lead.id)));
    }

    let phone = phone.map(|p| normalize_phone(&p)).unwrap_or_default();
    if phone.is_empty() {
        return Err(CrmError::Validation("Provide a lead_id or a phone".to_string()));
    }
    let lead = state.leads.find_by_phone(user.org_id, &phone).await?;
    Ok((phone, lead.map(|l| l.id)))
}

fn log_message(conn: &mut PgConnection, message: WhatsAppMessage) -> CrmResult<WhatsAppMessage> {
    let saved = diesel::insert_into(whatsapp_messages::table)
        .values(&message)
        .returning(WhatsAppMessage::as_returning())
        .get_result(conn)?;
    Ok(saved)
}

async fn load_connection(state: &AppState, org_id: Uuid) -> CrmResult<WhatsAppConnection> {
    interact(&state.conn, move |conn| org_connection(conn, org_id)).await
}

async fn record_outbound(
    state: &AppState,
    user: &AuthUser,
    connection: &WhatsAppConnection,
    (phone, lead_id): (String, Option<Uuid>),
    external_id: String,
    body: Option<String>,
    media_type: Option<String>,
) -> CrmResult<WhatsAppMessage> {
    let message = WhatsAppMessage {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        lead_id,
        direction: Direction::Outbound.as_str().to_string(),
        provider: connection.provider.clone(),
        external_id: Some(external_id),
        phone,
        body,
        media_type,
        sent_by: Some(user.user_id),
        created_at: Utc::now(),
    };
    interact(&state.conn, move |conn| log_message(conn, message)).await
}

async fn send_text(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SendRequest>,
) -> CrmResult<(StatusCode, Json<WhatsAppMessage>)> {
    let body = req.body.trim().to_string();
    Validator::new()
        .string_required(&body, "body")
        .length(&body, "body", None, Some(4096))
        .validate()?;

    let recipient = resolve_recipient(&state, &user, req.lead_id, req.phone).await?;
    let connection = load_connection(&state, user.org_id).await?;
    let gateway = build_gateway(state.http.clone(), &connection, &state.config.whatsapp.graph_url)?;

    let external_id = gateway.send_text(&recipient.0, &body).await?;
    let message = record_outbound(&state, &user, &connection, recipient, external_id, Some(body), None).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Default)]
struct MediaForm {
    lead_id: Option<Uuid>,
    phone: Option<String>,
    caption: Option<String>,
    file: Option<OutgoingMedia>,
}

async fn read_media_form(mut multipart: Multipart) -> CrmResult<MediaForm> {
    let bad = |e: axum::extract::multipart::MultipartError| CrmError::Validation(format!("Invalid upload: {e}"));
    let mut form = MediaForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad)?;
                form.file = Some(OutgoingMedia {
                    file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                    caption: None,
                });
            }
            "lead_id" => {
                let text = field.text().await.map_err(bad)?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| CrmError::Validation("Invalid lead_id".to_string()))?;
                form.lead_id = Some(id);
            }
            "phone" => form.phone = Some(field.text().await.map_err(bad)?),
            "caption" => {
                let caption = field.text().await.map_err(bad)?;
                form.caption = Some(caption.trim().to_string()).filter(|c| !c.is_empty());
            }
            other => debug!("Ignoring multipart field {other}"),
        }
    }
    Ok(form)
}

async fn send_media(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> CrmResult<(StatusCode, Json<WhatsAppMessage>)> {
    let form = read_media_form(multipart).await?;
    let mut media = form
        .file
        .ok_or_else(|| CrmError::Validation("No file provided".to_string()))?;
    if media.bytes.is_empty() {
        return Err(CrmError::Validation("File is empty".to_string()));
    }
    if media.bytes.len() > MAX_MEDIA_BYTES {
        return Err(CrmError::Validation("File exceeds 16 MB".to_string()));
    }
    media.caption = form.caption.clone();

    let recipient = resolve_recipient(&state, &user, form.lead_id, form.phone).await?;
    let connection = load_connection(&state, user.org_id).await?;
    let gateway = build_gateway(state.http.clone(), &connection, &state.config.whatsapp.graph_url)?;

    let media_type = media.kind().as_str().to_string();
    let external_id = gateway.send_media(&recipient.0, media).await?;
    let message = record_outbound(
        &state,
        &user,
        &connection,
        recipient,
        external_id,
        form.caption,
        Some(media_type),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<MessageQuery>,
) -> CrmResult<Json<Vec<WhatsAppMessage>>> {
    let org_id = user.org_id;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let phone = query.phone.map(|p| normalize_phone(&p)).filter(|p| !p.is_empty());

    let messages = interact(&state.conn, move |conn| {
        let mut q = whatsapp_messages::table
            .filter(whatsapp_messages::org_id.eq(org_id))
            .into_boxed();
        if let Some(lead_id) = query.lead_id {
            q = q.filter(whatsapp_messages::lead_id.eq(lead_id));
        }
        if let Some(phone) = phone {
            q = q.filter(whatsapp_messages::phone.eq(phone));
        }
        let rows = q
            .order(whatsapp_messages::created_at.desc())
            .limit(limit)
            .select(WhatsAppMessage::as_select())
            .load(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(messages))
}

async fn verify_cloud_webhook(State(state): State<Arc<AppState>>, Query(query): Query<VerifyQuery>) -> CrmResult<String> {
    match query.challenge_for(&state.config.whatsapp.verify_token) {
        Some(challenge) => {
            info!("WhatsApp webhook verified");
            Ok(challenge.to_string())
        }
        None => {
            warn!("WhatsApp webhook verification failed");
            Err(CrmError::Forbidden("Verification token mismatch".to_string()))
        }
    }
}

/// Links an inbound message to the tenant's lead with that phone, creating
/// the lead on first contact, and logs it. Provider retries are ignored.
async fn ingest(state: &AppState, connection: &WhatsAppConnection, inbound: InboundMessage) -> CrmResult<()> {
    let log = PgMessageLog::new(state.conn.clone());
    inbox::ingest(state.leads.as_ref(), &log, connection, inbound).await?;
    Ok(())
}

async fn cloud_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> CrmResult<Json<serde_json::Value>> {
    if let Some(secret) = &state.config.whatsapp.app_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("sha256="))
            .ok_or(CrmError::Unauthorized)?;
        if !verify_hex_signature(secret, body.as_bytes(), signature) {
            warn!("Rejected WhatsApp webhook with a bad signature");
            return Err(CrmError::Unauthorized);
        }
    }

    let webhook: CloudWebhook = serde_json::from_str(&body)
        .map_err(|e| CrmError::Validation(format!("Invalid webhook payload: {e}")))?;

    for (phone_number_id, inbound) in cloud_inbound(&webhook) {
        let lookup_id = phone_number_id.clone();
        let connection = interact(&state.conn, move |conn| {
            Ok(connection_for(conn, Provider::Cloud, &lookup_id)?)
        })
        .await?;
        match connection {
            Some(connection) => ingest(&state, &connection, inbound).await?,
            None => warn!("No connection for WhatsApp number {phone_number_id}"),
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

async fn evolution_webhook(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    headers: HeaderMap,
    Json(webhook): Json<EvolutionWebhook>,
) -> CrmResult<Json<serde_json::Value>> {
    let lookup = instance.clone();
    let connection = interact(&state.conn, move |conn| {
        Ok(connection_for(conn, Provider::Evolution, &lookup)?)
    })
    .await?
    .ok_or(CrmError::not_found("WhatsApp connection"))?;

    let presented = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .or(webhook.apikey.as_deref());
    let authorized = presented
        .map(|key| constant_time_compare(key, &connection.access_token))
        .unwrap_or(false);
    if !authorized {
        warn!("Rejected Evolution webhook for instance {instance}");
        return Err(CrmError::Unauthorized);
    }

    if let Some(inbound) = evolution_inbound(&webhook) {
        ingest(&state, &connection, inbound).await?;
    }
    Ok(Json(serde_json::json!({ "received": true })))
}
