use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::forms::clean;
use crate::security::auth::AuthUser;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::lead_followups;
use crate::shared::state::AppState;
use crate::shared::utils::interact;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = lead_followups)]
pub struct Followup {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lead_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub note: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFollowupRequest {
    pub lead_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FollowupQuery {
    pub lead_id: Option<Uuid>,
    pub due_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_only: bool,
}

pub fn configure_followups_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/followups", get(list_followups).post(create_followup))
        .route("/api/followups/:id/complete", post(complete_followup))
        .route("/api/followups/:id", delete(delete_followup))
}

async fn list_followups(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<FollowupQuery>,
) -> CrmResult<Json<Vec<Followup>>> {
    let org_id = user.org_id;
    let rows = interact(&state.conn, move |conn| {
        let mut q = lead_followups::table
            .filter(lead_followups::org_id.eq(org_id))
            .select(Followup::as_select())
            .into_boxed();

        if let Some(lead_id) = query.lead_id {
            q = q.filter(lead_followups::lead_id.eq(lead_id));
        }
        if let Some(before) = query.due_before {
            q = q.filter(lead_followups::scheduled_for.lt(before));
        }
        if query.pending_only {
            q = q.filter(lead_followups::completed_at.is_null());
        }

        let rows = q.order(lead_followups::scheduled_for.asc()).load(conn)?;
        Ok(rows)
    })
    .await?;

    Ok(Json(rows))
}

async fn create_followup(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateFollowupRequest>,
) -> CrmResult<(StatusCode, Json<Followup>)> {
    // Rejects leads of other tenants with 404.
    state.leads.get(user.org_id, req.lead_id).await?;

    let followup = Followup {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        lead_id: req.lead_id,
        scheduled_for: req.scheduled_for,
        note: clean(req.note),
        completed_at: None,
        created_by: user.user_id,
        created_at: Utc::now(),
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(lead_followups::table)
            .values(&followup)
            .returning(Followup::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn complete_followup(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Followup>> {
    let org_id = user.org_id;
    let row = interact(&state.conn, move |conn| {
        let existing: Followup = lead_followups::table
            .filter(lead_followups::id.eq(id))
            .filter(lead_followups::org_id.eq(org_id))
            .select(Followup::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Followup"))?;
        if existing.completed_at.is_some() {
            return Ok(existing);
        }

        let row = diesel::update(lead_followups::table.find(existing.id))
            .set(lead_followups::completed_at.eq(Some(Utc::now())))
            .returning(Followup::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok(Json(row))
}

async fn delete_followup(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        let deleted = diesel::delete(
            lead_followups::table
                .filter(lead_followups::id.eq(id))
                .filter(lead_followups::org_id.eq(org_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(CrmError::not_found("Followup"));
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
