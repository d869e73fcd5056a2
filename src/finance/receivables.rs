use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::dashboard::{summarize, FinanceSummary};
use super::payment_methods::load_payment_methods;
use crate::leads::models::double_option;
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{payment_methods, receivables};
use crate::shared::state::AppState;
use crate::shared::utils::interact;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = receivables)]
pub struct Receivable {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub description: String,
    pub amount: BigDecimal,
    pub payment_method_id: Option<Uuid>,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receivable {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.paid_at.is_none() && self.due_date < today
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReceivableRequest {
    pub lead_id: Option<Uuid>,
    pub description: String,
    pub amount: BigDecimal,
    pub payment_method_id: Option<Uuid>,
    pub due_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = receivables)]
pub struct UpdateReceivableRequest {
    pub description: Option<String>,
    pub amount: Option<BigDecimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub payment_method_id: Option<Option<Uuid>>,
    pub due_date: Option<NaiveDate>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReceivableQuery {
    pub lead_id: Option<Uuid>,
    pub status: Option<ReceivableStatus>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivableStatus {
    Paid,
    Pending,
    Overdue,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayReceivableRequest {
    pub paid_at: Option<DateTime<Utc>>,
}

fn validate_amount(amount: &BigDecimal) -> CrmResult<()> {
    Validator::new()
        .custom(|| {
            (amount <= &BigDecimal::from(0)).then(|| {
                crate::security::validation::ValidationError::InvalidValue {
                    field: "amount".to_string(),
                    message: "must be greater than zero".to_string(),
                }
            })
        })
        .validate()?;
    Ok(())
}

pub fn configure_receivable_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/finance/receivables",
            get(list_receivables).post(create_receivable),
        )
        .route(
            "/api/finance/receivables/:id",
            get(get_receivable)
                .put(update_receivable)
                .delete(delete_receivable),
        )
        .route("/api/finance/receivables/:id/pay", post(pay_receivable))
        .route("/api/finance/dashboard", get(dashboard))
}

async fn ensure_payment_method(state: &AppState, org_id: Uuid, method_id: Option<Uuid>) -> CrmResult<()> {
    let Some(method_id) = method_id else {
        return Ok(());
    };
    let exists = interact(&state.conn, move |conn| {
        let count: i64 = payment_methods::table
            .filter(payment_methods::id.eq(method_id))
            .filter(payment_methods::org_id.eq(org_id))
            .count()
            .get_result(conn)?;
        Ok(count > 0)
    })
    .await?;
    if !exists {
        return Err(CrmError::Validation(
            "Payment method does not belong to this organization".to_string(),
        ));
    }
    Ok(())
}

async fn list_receivables(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ReceivableQuery>,
) -> CrmResult<Json<Vec<Receivable>>> {
    let org_id = user.org_id;
    let today = Utc::now().date_naive();
    let rows = interact(&state.conn, move |conn| {
        let mut q = receivables::table
            .filter(receivables::org_id.eq(org_id))
            .select(Receivable::as_select())
            .into_boxed();

        if let Some(lead_id) = query.lead_id {
            q = q.filter(receivables::lead_id.eq(lead_id));
        }
        if let Some(from) = query.due_from {
            q = q.filter(receivables::due_date.ge(from));
        }
        if let Some(to) = query.due_to {
            q = q.filter(receivables::due_date.le(to));
        }
        q = match query.status {
            Some(ReceivableStatus::Paid) => q.filter(receivables::paid_at.is_not_null()),
            Some(ReceivableStatus::Pending) => q.filter(receivables::paid_at.is_null()),
            Some(ReceivableStatus::Overdue) => q
                .filter(receivables::paid_at.is_null())
                .filter(receivables::due_date.lt(today)),
            None => q,
        };

        let rows = q.order(receivables::due_date.asc()).load(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(rows))
}

async fn create_receivable(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateReceivableRequest>,
) -> CrmResult<(StatusCode, Json<Receivable>)> {
    Validator::new()
        .string_required(&req.description, "description")
        .length(&req.description, "description", None, Some(200))
        .validate()?;
    validate_amount(&req.amount)?;

    if let Some(lead_id) = req.lead_id {
        state.leads.get(user.org_id, lead_id).await?;
    }
    ensure_payment_method(&state, user.org_id, req.payment_method_id).await?;

    let now = Utc::now();
    let receivable = Receivable {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        lead_id: req.lead_id,
        description: req.description.trim().to_string(),
        amount: req.amount,
        payment_method_id: req.payment_method_id,
        due_date: req.due_date,
        paid_at: None,
        created_by: user.user_id,
        created_at: now,
        updated_at: now,
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(receivables::table)
            .values(&receivable)
            .returning(Receivable::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_receivable(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Receivable>> {
    let org_id = user.org_id;
    let row = interact(&state.conn, move |conn| {
        receivables::table
            .filter(receivables::id.eq(id))
            .filter(receivables::org_id.eq(org_id))
            .select(Receivable::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Receivable"))
    })
    .await?;
    Ok(Json(row))
}

async fn update_receivable(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateReceivableRequest>,
) -> CrmResult<Json<Receivable>> {
    if let Some(description) = &req.description {
        Validator::new()
            .string_required(description, "description")
            .length(description, "description", None, Some(200))
            .validate()?;
    }
    if let Some(amount) = &req.amount {
        validate_amount(amount)?;
    }
    if let Some(method_id) = req.payment_method_id {
        ensure_payment_method(&state, user.org_id, method_id).await?;
    }
    req.updated_at = Some(Utc::now());
    let org_id = user.org_id;

    let row = interact(&state.conn, move |conn| {
        diesel::update(
            receivables::table
                .filter(receivables::id.eq(id))
                .filter(receivables::org_id.eq(org_id)),
        )
        .set(&req)
        .returning(Receivable::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(CrmError::not_found("Receivable"))
    })
    .await?;
    Ok(Json(row))
}

async fn delete_receivable(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        let deleted = diesel::delete(
            receivables::table
                .filter(receivables::id.eq(id))
                .filter(receivables::org_id.eq(org_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(CrmError::not_found("Receivable"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Marks a receivable as paid. Paying twice is rejected so the recorded
/// payment date is never overwritten.
async fn pay_receivable(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<PayReceivableRequest>>,
) -> CrmResult<Json<Receivable>> {
    let paid_at = body.and_then(|Json(b)| b.paid_at).unwrap_or_else(Utc::now);
    let org_id = user.org_id;

    let row = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            let existing: Receivable = receivables::table
                .filter(receivables::id.eq(id))
                .filter(receivables::org_id.eq(org_id))
                .select(Receivable::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(CrmError::not_found("Receivable"))?;
            if existing.paid_at.is_some() {
                return Err(CrmError::Conflict("Receivable is already paid".to_string()));
            }

            let row = diesel::update(receivables::table.find(existing.id))
                .set((
                    receivables::paid_at.eq(Some(paid_at)),
                    receivables::updated_at.eq(Utc::now()),
                ))
                .returning(Receivable::as_returning())
                .get_result(conn)?;
            Ok(row)
        })
    })
    .await?;

    info!("Receivable {} paid in org {}", row.id, row.org_id);
    Ok(Json(row))
}

async fn dashboard(State(state): State<Arc<AppState>>, user: AuthUser) -> CrmResult<Json<FinanceSummary>> {
    let org_id = user.org_id;
    let rows = interact(&state.conn, move |conn| {
        let rows = receivables::table
            .filter(receivables::org_id.eq(org_id))
            .select(Receivable::as_select())
            .load(conn)?;
        Ok(rows)
    })
    .await?;
    let methods = load_payment_methods(&state, org_id).await?;

    Ok(Json(summarize(&rows, &methods, Utc::now().date_naive())))
}
