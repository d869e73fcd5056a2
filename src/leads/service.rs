use chrono::Utc;
use log::info;
use uuid::Uuid;

use super::models::{
    ChainBreak, ChainReport, Lead, LeadChanges, LeadStageHistory, StageChange, StageTransition,
    UpdateLeadRequest,
};
use super::store::LeadStore;
use crate::forms::{clean, LeadForm, MAX_INSTALLMENTS, MAX_RATING};
use crate::funnel::LeadStage;
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::utils::normalize_phone;

async fn ensure_member(store: &dyn LeadStore, org_id: Uuid, user_id: Option<Uuid>) -> CrmResult<()> {
    if let Some(user_id) = user_id {
        if !store.is_member(org_id, user_id).await? {
            return Err(CrmError::Validation(
                "Assignee is not a member of this organization".to_string(),
            ));
        }
    }
    Ok(())
}

/// Creates a lead and its initial history row (`previous_stage = None`).
pub async fn create_lead(store: &dyn LeadStore, user: &AuthUser, form: LeadForm) -> CrmResult<Lead> {
    form.validate()?;
    let form = form.normalized();
    ensure_member(store, user.org_id, form.assigned_to).await?;

    let now = Utc::now();
    let stage = form.stage.unwrap_or_default();
    let lead = Lead {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        name: form.name,
        email: form.email,
        phone: form.phone,
        stage,
        rating: form.rating,
        assigned_to: form.assigned_to,
        created_by: user.user_id,
        product_id: form.product_id,
        negotiated_value: form.negotiated_value,
        payment_method_id: form.payment_method_id,
        installments: form.installments,
        notes: form.notes,
        source: form.source,
        created_at: now,
        updated_at: now,
        closed_at: stage.is_closed().then_some(now),
    };
    let initial = LeadStageHistory::new(&lead, None, None, user.user_id, now);

    let lead = store.insert(lead, initial).await?;
    info!("Lead {} created in org {} at stage {}", lead.id, lead.org_id, lead.stage);
    Ok(lead)
}

fn validate_update(req: &UpdateLeadRequest) -> CrmResult<()> {
    let name = req.name.as_deref();
    let mut validator = Validator::new();
    if let Some(name) = name {
        validator = validator
            .string_required(name, "name")
            .length(name, "name", Some(2), Some(120));
    }
    validator
        .optional_email(req.email.as_ref().and_then(|e| e.as_deref()))
        .optional_phone(req.phone.as_ref().and_then(|p| p.as_deref()))
        .range(req.rating, "rating", Some(0), Some(MAX_RATING))
        .range(req.installments.flatten(), "installments", Some(1), Some(MAX_INSTALLMENTS))
        .range(
            req.negotiated_value.clone().flatten(),
            "negotiated_value",
            Some(bigdecimal::BigDecimal::from(0)),
            None,
        )
        .validate()?;
    Ok(())
}

/// Applies field updates and an optional `stage` key in one transaction;
/// a stage move writes its history row like [`change_stage`].
pub async fn update_lead(
    store: &dyn LeadStore,
    user: &AuthUser,
    id: Uuid,
    req: UpdateLeadRequest,
) -> CrmResult<Lead> {
    validate_update(&req)?;
    if let Some(assignee) = req.assigned_to {
        ensure_member(store, user.org_id, assignee).await?;
    }

    let changes = LeadChanges {
        name: req.name.map(|n| n.trim().to_string()),
        email: req.email.map(|e| clean(e).map(|e| e.to_lowercase())),
        phone: req.phone.map(|p| clean(p).map(|p| normalize_phone(&p))),
        rating: req.rating,
        assigned_to: req.assigned_to,
        product_id: req.product_id,
        negotiated_value: req.negotiated_value,
        payment_method_id: req.payment_method_id,
        installments: req.installments,
        notes: req.notes.map(clean),
        source: req.source.map(clean),
        updated_at: Some(Utc::now()),
    };

    let stage = req.stage.map(|stage| StageChange {
        stage,
        reason: clean(req.reason),
        changed_by: user.user_id,
    });

    let transition = store.update_with_stage(user.org_id, id, changes, stage).await?;
    log_transition(user, id, &transition);
    Ok(transition.lead)
}

fn log_transition(user: &AuthUser, id: Uuid, transition: &StageTransition) {
    if let Some(entry) = &transition.history {
        info!(
            "Lead {id} moved {} -> {} by {}",
            entry.previous_stage.map(|s| s.as_str()).unwrap_or("-"),
            entry.stage,
            user.user_id
        );
    }
}

pub async fn change_stage(
    store: &dyn LeadStore,
    user: &AuthUser,
    id: Uuid,
    stage: LeadStage,
    reason: Option<String>,
) -> CrmResult<StageTransition> {
    let change = StageChange {
        stage,
        reason: clean(reason),
        changed_by: user.user_id,
    };
    let transition = store.change_stage(user.org_id, id, change).await?;
    log_transition(user, id, &transition);
    Ok(transition)
}

pub async fn assign_lead(
    store: &dyn LeadStore,
    user: &AuthUser,
    id: Uuid,
    assignee: Option<Uuid>,
) -> CrmResult<Lead> {
    ensure_member(store, user.org_id, assignee).await?;
    let changes = LeadChanges {
        assigned_to: Some(assignee),
        updated_at: Some(Utc::now()),
        ..Default::default()
    };
    store.update(user.org_id, id, changes).await
}

pub async fn delete_lead(store: &dyn LeadStore, user: &AuthUser, id: Uuid) -> CrmResult<()> {
    store.delete(user.org_id, id).await?;
    info!("Lead {id} deleted by {}", user.user_id);
    Ok(())
}

pub async fn lead_history(store: &dyn LeadStore, user: &AuthUser, id: Uuid) -> CrmResult<Vec<LeadStageHistory>> {
    let entries = store.history(user.org_id, id).await?;
    if entries.is_empty() {
        // Distinguish "no such lead" from a lead without moves.
        store.get(user.org_id, id).await?;
    }
    Ok(entries)
}

/// Walks the entries in creation order and reports every entry whose
/// `previous_stage` differs from the stage of the entry before it.
pub fn verify_history_chain(
    lead_id: Uuid,
    entries: &[LeadStageHistory],
    current_stage: Option<LeadStage>,
) -> ChainReport {
    let mut breaks = Vec::new();
    let mut expected: Option<LeadStage> = None;

    for entry in entries {
        if entry.previous_stage != expected {
            breaks.push(ChainBreak {
                entry_id: entry.id,
                expected_previous: expected,
                actual_previous: entry.previous_stage,
            });
        }
        expected = Some(entry.stage);
    }

    let tail_matches_lead = match current_stage {
        Some(stage) => expected == Some(stage),
        None => true,
    };

    ChainReport {
        lead_id,
        entries: entries.len(),
        intact: breaks.is_empty() && tail_matches_lead && !entries.is_empty(),
        breaks,
        current_stage,
        tail_matches_lead,
    }
}

pub async fn verify_lead_history(store: &dyn LeadStore, user: &AuthUser, id: Uuid) -> CrmResult<ChainReport> {
    let entries = store.history(user.org_id, id).await?;
    let current = match store.get(user.org_id, id).await {
        Ok(lead) => Some(lead.stage),
        Err(CrmError::NotFound { .. }) if !entries.is_empty() => None,
        Err(e) => return Err(e),
    };
    Ok(verify_history_chain(id, &entries, current))
}
