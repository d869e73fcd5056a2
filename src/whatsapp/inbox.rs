//! Inbound message logging. A message row is claimed before any lead work,
//! so a redelivered message never creates a second lead.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, info, warn};
use uuid::Uuid;

use super::types::InboundMessage;
use super::{Direction, WhatsAppConnection, WhatsAppMessage};
use crate::forms::LeadForm;
use crate::leads::service::create_lead;
use crate::leads::LeadStore;
use crate::security::auth::{AuthUser, MemberRole};
use crate::shared::error::CrmResult;
use crate::shared::schema::whatsapp_messages;
use crate::shared::utils::{interact, DbPool};

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Inserts the message unless the provider already delivered the same
    /// external id to this tenant. Returns `false` for a duplicate.
    async fn claim(&self, message: WhatsAppMessage) -> CrmResult<bool>;

    async fn link_lead(&self, org_id: Uuid, message_id: Uuid, lead_id: Uuid) -> CrmResult<()>;
}

#[derive(Clone)]
pub struct PgMessageLog {
    pool: DbPool,
}

impl PgMessageLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for PgMessageLog {
    async fn claim(&self, message: WhatsAppMessage) -> CrmResult<bool> {
        interact(&self.pool, move |conn| {
            let inserted = diesel::insert_into(whatsapp_messages::table)
                .values(&message)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn link_lead(&self, org_id: Uuid, message_id: Uuid, lead_id: Uuid) -> CrmResult<()> {
        interact(&self.pool, move |conn| {
            diesel::update(
                whatsapp_messages::table
                    .filter(whatsapp_messages::id.eq(message_id))
                    .filter(whatsapp_messages::org_id.eq(org_id)),
            )
            .set(whatsapp_messages::lead_id.eq(lead_id))
            .execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Duplicate,
    Linked(Uuid),
    CreatedLead(Uuid),
    Unlinked,
}

pub fn lead_form_for(inbound: &InboundMessage) -> LeadForm {
    let name = inbound
        .contact_name
        .as_deref()
        .map(str::trim)
        .filter(|n| n.chars().count() >= 2)
        .map(|n| n.chars().take(120).collect())
        .unwrap_or_else(|| format!("WhatsApp {}", inbound.phone));
    LeadForm {
        name,
        phone: Some(inbound.phone.clone()),
        source: Some("whatsapp".to_string()),
        ..LeadForm::default()
    }
}

/// Logs one inbound message and links it to the tenant's lead with the same
/// phone. Unknown numbers get a new lead owned by whoever set up the
/// connection.
pub async fn ingest(
    leads: &dyn LeadStore,
    log: &dyn MessageLog,
    connection: &WhatsAppConnection,
    inbound: InboundMessage,
) -> CrmResult<Ingested> {
    let org_id = connection.org_id;
    let message = WhatsAppMessage {
        id: Uuid::new_v4(),
        org_id,
        lead_id: None,
        direction: Direction::Inbound.as_str().to_string(),
        provider: connection.provider.clone(),
        external_id: Some(inbound.external_id.clone()),
        phone: inbound.phone.clone(),
        body: inbound.body.clone(),
        media_type: inbound.media_type.clone(),
        sent_by: None,
        created_at: Utc::now(),
    };
    let message_id = message.id;

    if !log.claim(message).await? {
        debug!("WhatsApp message {} already logged", inbound.external_id);
        return Ok(Ingested::Duplicate);
    }

    let outcome = match leads.find_by_phone(org_id, &inbound.phone).await? {
        Some(lead) => Ingested::Linked(lead.id),
        None => {
            let owner = AuthUser {
                user_id: connection.created_by,
                org_id,
                role: MemberRole::Member,
                email: String::new(),
            };
            match create_lead(leads, &owner, lead_form_for(&inbound)).await {
                Ok(lead) => {
                    info!("Lead {} created from WhatsApp contact {}", lead.id, inbound.phone);
                    Ingested::CreatedLead(lead.id)
                }
                Err(e) => {
                    warn!("Could not create lead for WhatsApp contact {}: {e}", inbound.phone);
                    Ingested::Unlinked
                }
            }
        }
    };

    if let Ingested::Linked(lead_id) | Ingested::CreatedLead(lead_id) = outcome {
        log.link_lead(org_id, message_id, lead_id).await?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::memory::MemoryLeadStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryMessageLog {
        rows: Mutex<Vec<WhatsAppMessage>>,
    }

    impl MemoryMessageLog {
        fn rows(&self) -> Vec<WhatsAppMessage> {
            self.rows.lock().expect("log lock").clone()
        }
    }

    #[async_trait]
    impl MessageLog for MemoryMessageLog {
        async fn claim(&self, message: WhatsAppMessage) -> CrmResult<bool> {
            let mut rows = self.rows.lock().expect("log lock");
            let duplicate = rows.iter().any(|m| {
                m.org_id == message.org_id
                    && m.provider == message.provider
                    && m.external_id == message.external_id
            });
            if duplicate {
                return Ok(false);
            }
            rows.push(message);
            Ok(true)
        }

        async fn link_lead(&self, org_id: Uuid, message_id: Uuid, lead_id: Uuid) -> CrmResult<()> {
            let mut rows = self.rows.lock().expect("log lock");
            if let Some(row) = rows.iter_mut().find(|m| m.id == message_id && m.org_id == org_id) {
                row.lead_id = Some(lead_id);
            }
            Ok(())
        }
    }

    fn connection() -> WhatsAppConnection {
        let now = Utc::now();
        WhatsAppConnection {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            provider: "cloud".to_string(),
            external_id: "PN1".to_string(),
            access_token: "token".to_string(),
            base_url: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn inbound(external_id: &str, phone: &str) -> InboundMessage {
        InboundMessage {
            external_id: external_id.to_string(),
            phone: phone.to_string(),
            contact_name: Some("Bia Souza".to_string()),
            body: Some("quero um bolo".to_string()),
            media_type: None,
        }
    }

    #[tokio::test]
    async fn test_first_contact_creates_whatsapp_lead() {
        let leads = MemoryLeadStore::new();
        let log = MemoryMessageLog::default();
        let conn = connection();

        let outcome = ingest(&leads, &log, &conn, inbound("m1", "5511988887777"))
            .await
            .expect("ingest");
        let Ingested::CreatedLead(lead_id) = outcome else {
            panic!("expected a new lead, got {outcome:?}");
        };

        let lead = leads.get(conn.org_id, lead_id).await.expect("lead");
        assert_eq!(lead.source.as_deref(), Some("whatsapp"));
        assert_eq!(lead.created_by, conn.created_by);
        assert_eq!(lead.name, "Bia Souza");
        assert_eq!(lead.phone.as_deref(), Some("5511988887777"));

        let rows = log.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].lead_id, Some(lead_id));
        assert_eq!(rows[0].direction, "inbound");
    }

    #[tokio::test]
    async fn test_known_contact_links_existing_lead() {
        let leads = MemoryLeadStore::new();
        let log = MemoryMessageLog::default();
        let conn = connection();
        let seller = AuthUser {
            user_id: conn.created_by,
            org_id: conn.org_id,
            role: MemberRole::Member,
            email: "seller@example.com".to_string(),
        };
        let form = LeadForm {
            name: "Carla Dias".to_string(),
            phone: Some("+55 (11) 98888-7777".to_string()),
            ..LeadForm::default()
        };
        let existing = create_lead(&leads, &seller, form).await.expect("create");

        let outcome = ingest(&leads, &log, &conn, inbound("m1", "5511988887777"))
            .await
            .expect("ingest");
        assert_eq!(outcome, Ingested::Linked(existing.id));
        assert_eq!(log.rows()[0].lead_id, Some(existing.id));

        let all = leads
            .list(conn.org_id, Default::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_message_is_logged_once() {
        let leads = MemoryLeadStore::new();
        let log = MemoryMessageLog::default();
        let conn = connection();

        let first = ingest(&leads, &log, &conn, inbound("m1", "5511988887777"))
            .await
            .expect("first");
        assert!(matches!(first, Ingested::CreatedLead(_)));

        let again = ingest(&leads, &log, &conn, inbound("m1", "5511988887777"))
            .await
            .expect("again");
        assert_eq!(again, Ingested::Duplicate);

        assert_eq!(log.rows().len(), 1);
        let all = leads
            .list(conn.org_id, Default::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_redelivery_creates_one_lead() {
        let leads = std::sync::Arc::new(MemoryLeadStore::new());
        let log = std::sync::Arc::new(MemoryMessageLog::default());
        let conn = connection();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let leads = leads.clone();
            let log = log.clone();
            let conn = conn.clone();
            handles.push(tokio::spawn(async move {
                ingest(leads.as_ref(), log.as_ref(), &conn, inbound("m1", "5511988887777")).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if let Ingested::CreatedLead(_) = handle.await.expect("join").expect("ingest") {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(log.rows().len(), 1);
    }

    #[test]
    fn test_lead_form_for_unknown_contact() {
        let nameless = InboundMessage {
            contact_name: Some(" ".to_string()),
            ..inbound("m1", "5511999990000")
        };
        let form = lead_form_for(&nameless);
        assert_eq!(form.name, "WhatsApp 5511999990000");
        assert_eq!(form.source.as_deref(), Some("whatsapp"));
        assert!(form.validate().is_ok());

        assert_eq!(lead_form_for(&inbound("m2", "5511999990000")).name, "Bia Souza");
    }
}
