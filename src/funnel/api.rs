use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use super::custom::{
    build_board, check_alignment, default_stages, AlignmentIssue, FunnelBoard, FunnelStageCustom,
    NewFunnelStage,
};
use super::{LeadStage, StageMetadata, StageType};
use crate::security::auth::AuthUser;
use crate::security::validation::{ValidationError, Validator};
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::funnel_stages_custom;
use crate::shared::state::AppState;
use crate::shared::utils::{interact, DbPool};

static COLOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("Invalid color regex"));

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub name: String,
    pub color: String,
    pub position: i32,
    pub stage_type: StageType,
}

impl StageRequest {
    fn validate(&self) -> CrmResult<()> {
        Validator::new()
            .string_required(&self.name, "name")
            .length(&self.name, "name", None, Some(60))
            .custom(|| {
                (!COLOR_REGEX.is_match(&self.color)).then(|| ValidationError::InvalidValue {
                    field: "color".to_string(),
                    message: "expected #rrggbb".to_string(),
                })
            })
            .range(Some(self.position), "position", Some(0), Some(100))
            .validate()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AlignmentReport {
    pub aligned: bool,
    pub issues: Vec<AlignmentIssue>,
}

pub fn configure_funnel_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/funnel/stages", get(list_fixed_stages))
        .route("/api/funnel/custom", get(list_custom_stages).post(create_custom_stage))
        .route("/api/funnel/custom/reset", post(reset_custom_stages))
        .route("/api/funnel/custom/alignment", get(alignment))
        .route(
            "/api/funnel/custom/:id",
            put(update_custom_stage).delete(delete_custom_stage),
        )
        .route("/api/funnel/board", get(board))
}

/// Inserts the default stage set. Runs inside the caller's transaction.
pub fn insert_default_stages(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<usize> {
    diesel::insert_into(funnel_stages_custom::table)
        .values(&default_stages(org_id))
        .execute(conn)
}

pub async fn load_custom_stages(pool: &DbPool, org_id: Uuid) -> CrmResult<Vec<FunnelStageCustom>> {
    interact(pool, move |conn| {
        let rows = funnel_stages_custom::table
            .filter(funnel_stages_custom::org_id.eq(org_id))
            .order((funnel_stages_custom::stage_type.asc(), funnel_stages_custom::position.asc()))
            .select(FunnelStageCustom::as_select())
            .load(conn)?;
        Ok(rows)
    })
    .await
}

async fn list_fixed_stages(_user: AuthUser) -> Json<Vec<StageMetadata>> {
    Json(LeadStage::ALL.iter().map(LeadStage::metadata).collect())
}

async fn list_custom_stages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> CrmResult<Json<Vec<FunnelStageCustom>>> {
    Ok(Json(load_custom_stages(&state.conn, user.org_id).await?))
}

async fn create_custom_stage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<StageRequest>,
) -> CrmResult<(StatusCode, Json<FunnelStageCustom>)> {
    user.require_admin()?;
    req.validate()?;

    let now = Utc::now();
    let stage = NewFunnelStage {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        name: req.name.trim().to_string(),
        color: req.color,
        position: req.position,
        stage_type: req.stage_type,
        created_at: now,
        updated_at: now,
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(funnel_stages_custom::table)
            .values(&stage)
            .returning(FunnelStageCustom::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_custom_stage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StageRequest>,
) -> CrmResult<Json<FunnelStageCustom>> {
    user.require_admin()?;
    req.validate()?;
    let org_id = user.org_id;

    let updated = interact(&state.conn, move |conn| {
        diesel::update(
            funnel_stages_custom::table
                .filter(funnel_stages_custom::id.eq(id))
                .filter(funnel_stages_custom::org_id.eq(org_id)),
        )
        .set((
            funnel_stages_custom::name.eq(req.name.trim()),
            funnel_stages_custom::color.eq(&req.color),
            funnel_stages_custom::position.eq(req.position),
            funnel_stages_custom::stage_type.eq(req.stage_type),
            funnel_stages_custom::updated_at.eq(Utc::now()),
        ))
        .returning(FunnelStageCustom::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(CrmError::not_found("Funnel stage"))
    })
    .await?;

    Ok(Json(updated))
}

async fn delete_custom_stage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    user.require_admin()?;
    let org_id = user.org_id;

    interact(&state.conn, move |conn| {
        let deleted = diesel::delete(
            funnel_stages_custom::table
                .filter(funnel_stages_custom::id.eq(id))
                .filter(funnel_stages_custom::org_id.eq(org_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(CrmError::not_found("Funnel stage"));
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn reset_custom_stages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> CrmResult<Json<Vec<FunnelStageCustom>>> {
    user.require_admin()?;
    let org_id = user.org_id;

    interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            diesel::delete(funnel_stages_custom::table.filter(funnel_stages_custom::org_id.eq(org_id)))
                .execute(conn)?;
            insert_default_stages(conn, org_id)?;
            Ok(())
        })
    })
    .await?;

    log::info!("Funnel stages of org {org_id} reset to defaults");
    Ok(Json(load_custom_stages(&state.conn, org_id).await?))
}

async fn alignment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> CrmResult<Json<AlignmentReport>> {
    let stages = load_custom_stages(&state.conn, user.org_id).await?;
    let issues = check_alignment(&stages);
    Ok(Json(AlignmentReport {
        aligned: issues.is_empty(),
        issues,
    }))
}

async fn board(State(state): State<Arc<AppState>>, user: AuthUser) -> CrmResult<Json<FunnelBoard>> {
    let stages = load_custom_stages(&state.conn, user.org_id).await?;
    let counts = state.leads.stage_counts(user.org_id).await?;
    Ok(Json(build_board(&stages, &counts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth::MemberRole;
    use crate::shared::test_utils::{read_json, TestContext};
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_stage_request_validation() {
        let ok = StageRequest {
            name: "Negotiating".into(),
            color: "#22c55e".into(),
            position: 3,
            stage_type: StageType::Funnel,
        };
        assert!(ok.validate().is_ok());

        let bad = StageRequest {
            name: "".into(),
            color: "green".into(),
            position: -1,
            stage_type: StageType::Funnel,
        };
        match bad.validate() {
            Err(CrmError::InvalidFields(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fixed_stages_are_listed_in_order() {
        let ctx = TestContext::new();
        let response = configure_funnel_routes()
            .with_state(ctx.state.clone())
            .oneshot(ctx.get_request("/api/funnel/stages"))
            .await
            .expect("response");
        let body = read_json(response).await;
        let stages = body.as_array().expect("array");
        assert_eq!(stages.len(), 9);
        assert_eq!(stages[0]["stage"], "prospect");
        assert_eq!(stages[5]["stage"], "waiting_payment");
        assert_eq!(stages[8]["stage_type"], "cloud");
    }

    #[tokio::test]
    async fn test_members_cannot_edit_stages() {
        let ctx = TestContext::new();
        let token = ctx.token_for(ctx.org_id, ctx.user_id, MemberRole::Member);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/funnel/custom")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                json!({"name": "X", "color": "#000000", "position": 1, "stage_type": "funnel"})
                    .to_string(),
            ))
            .expect("request");

        let response = configure_funnel_routes()
            .with_state(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
