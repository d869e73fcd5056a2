use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::models::{
    AssignLeadRequest, ChainReport, ChangeStageRequest, Lead, LeadFilter, LeadStageHistory,
    StageTransition, UpdateLeadRequest,
};
use super::service;
use crate::forms::LeadForm;
use crate::security::auth::AuthUser;
use crate::shared::error::CrmResult;
use crate::shared::state::AppState;

pub fn configure_leads_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", get(list_leads).post(create_lead))
        .route(
            "/api/leads/:id",
            get(get_lead).put(update_lead).patch(update_lead).delete(delete_lead),
        )
        .route("/api/leads/:id/stage", post(change_stage))
        .route("/api/leads/:id/assign", post(assign_lead))
        .route("/api/leads/:id/history", get(lead_history))
        .route("/api/leads/:id/history/verify", get(verify_history))
}

async fn list_leads(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(filter): Query<LeadFilter>,
) -> CrmResult<Json<Vec<Lead>>> {
    let leads = state.leads.list(user.org_id, filter).await?;
    Ok(Json(leads))
}

async fn create_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(form): Json<LeadForm>,
) -> CrmResult<(StatusCode, Json<Lead>)> {
    let lead = service::create_lead(state.leads.as_ref(), &user, form).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

async fn get_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Lead>> {
    Ok(Json(state.leads.get(user.org_id, id).await?))
}

async fn update_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLeadRequest>,
) -> CrmResult<Json<Lead>> {
    let lead = service::update_lead(state.leads.as_ref(), &user, id, req).await?;
    Ok(Json(lead))
}

async fn delete_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    service::delete_lead(state.leads.as_ref(), &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_stage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStageRequest>,
) -> CrmResult<Json<StageTransition>> {
    let transition =
        service::change_stage(state.leads.as_ref(), &user, id, req.stage, req.reason).await?;
    Ok(Json(transition))
}

async fn assign_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignLeadRequest>,
) -> CrmResult<Json<Lead>> {
    let lead = service::assign_lead(state.leads.as_ref(), &user, id, req.user_id).await?;
    Ok(Json(lead))
}

async fn lead_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Vec<LeadStageHistory>>> {
    let history = service::lead_history(state.leads.as_ref(), &user, id).await?;
    Ok(Json(history))
}

async fn verify_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<ChainReport>> {
    let report = service::verify_lead_history(state.leads.as_ref(), &user, id).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::{read_json, TestContext};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(ctx: &TestContext) -> Router {
        configure_leads_routes().with_state(ctx.state.clone())
    }

    #[tokio::test]
    async fn test_create_move_and_read_history() {
        let ctx = TestContext::new();

        let response = app(&ctx)
            .oneshot(ctx.json_request(
                "POST",
                "/api/leads",
                json!({"name": "João Pereira", "phone": "+55 21 98888-7777", "rating": 3}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let lead = read_json(response).await;
        let id = lead["id"].as_str().expect("id").to_string();
        assert_eq!(lead["stage"], "prospect");

        let response = app(&ctx)
            .oneshot(ctx.json_request(
                "POST",
                &format!("/api/leads/{id}/stage"),
                json!({"stage": "contacted", "reason": "Called"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let transition = read_json(response).await;
        assert_eq!(transition["changed"], true);
        assert_eq!(transition["history"]["previous_stage"], "prospect");

        let response = app(&ctx)
            .oneshot(ctx.get_request(&format!("/api/leads/{id}/history")))
            .await
            .expect("response");
        let history = read_json(response).await;
        assert_eq!(history.as_array().map(Vec::len), Some(2));

        let response = app(&ctx)
            .oneshot(ctx.get_request(&format!("/api/leads/{id}/history/verify")))
            .await
            .expect("response");
        let report = read_json(response).await;
        assert_eq!(report["intact"], true);
    }

    #[tokio::test]
    async fn test_invalid_lead_returns_field_details() {
        let ctx = TestContext::new();
        let response = app(&ctx)
            .oneshot(ctx.json_request("POST", "/api/leads", json!({"name": "", "rating": 9})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = read_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert!(body["details"]["name"].is_string());
        assert!(body["details"]["rating"].is_string());
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let ctx = TestContext::new();
        let request = axum::http::Request::builder()
            .uri("/api/leads")
            .body(axum::body::Body::empty())
            .expect("request");
        let response = app(&ctx).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_lead_is_not_found() {
        let ctx = TestContext::new();
        let response = app(&ctx)
            .oneshot(ctx.get_request(&format!("/api/leads/{}", Uuid::new_v4())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
