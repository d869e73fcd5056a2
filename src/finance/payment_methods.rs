use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::security::auth::AuthUser;
use crate::security::validation::{ValidationError, Validator};
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::payment_methods;
use crate::shared::state::AppState;
use crate::shared::utils::interact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Pix,
    CreditCard,
    DebitCard,
    Boleto,
    Cash,
    Transfer,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::Boleto => "boleto",
            Self::Cash => "cash",
            Self::Transfer => "transfer",
        }
    }

    /// Only card payments can be split.
    pub fn allows_installments(&self) -> bool {
        matches!(self, Self::CreditCard)
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(Self::Pix),
            "credit_card" => Ok(Self::CreditCard),
            "debit_card" => Ok(Self::DebitCard),
            "boleto" => Ok(Self::Boleto),
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("Unknown payment kind: {s}")),
        }
    }
}

impl ToSql<Text, Pg> for PaymentKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for PaymentKind {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        value.parse().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = payment_methods)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub kind: PaymentKind,
    pub fee_percent: BigDecimal,
    pub max_installments: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    pub name: String,
    pub kind: PaymentKind,
    pub fee_percent: Option<BigDecimal>,
    pub max_installments: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentMethodQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(AsChangeset)]
#[diesel(table_name = payment_methods)]
struct PaymentMethodChanges {
    name: String,
    kind: PaymentKind,
    fee_percent: BigDecimal,
    max_installments: i32,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

impl PaymentMethodRequest {
    fn validate(&self) -> CrmResult<()> {
        Validator::new()
            .string_required(&self.name, "name")
            .length(&self.name, "name", Some(2), Some(80))
            .range(
                self.fee_percent.clone(),
                "fee_percent",
                Some(BigDecimal::from(0)),
                Some(BigDecimal::from(100)),
            )
            .range(self.max_installments, "max_installments", Some(1), Some(48))
            .custom(|| {
                let split = self.max_installments.unwrap_or(1) > 1;
                (split && !self.kind.allows_installments()).then(|| {
                    ValidationError::InvalidValue {
                        field: "max_installments".to_string(),
                        message: format!("{} payments cannot be split", self.kind.as_str()),
                    }
                })
            })
            .validate()?;
        Ok(())
    }
}

pub fn configure_payment_method_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/finance/payment-methods",
            get(list_payment_methods).post(create_payment_method),
        )
        .route(
            "/api/finance/payment-methods/:id",
            get(get_payment_method)
                .put(update_payment_method)
                .delete(delete_payment_method),
        )
}

pub async fn load_payment_methods(state: &AppState, org_id: Uuid) -> CrmResult<Vec<PaymentMethod>> {
    interact(&state.conn, move |conn| {
        let rows = payment_methods::table
            .filter(payment_methods::org_id.eq(org_id))
            .select(PaymentMethod::as_select())
            .order(payment_methods::name.asc())
            .load(conn)?;
        Ok(rows)
    })
    .await
}

async fn list_payment_methods(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<PaymentMethodQuery>,
) -> CrmResult<Json<Vec<PaymentMethod>>> {
    let mut rows = load_payment_methods(&state, user.org_id).await?;
    if query.active_only {
        rows.retain(|m| m.is_active);
    }
    Ok(Json(rows))
}

async fn create_payment_method(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<PaymentMethodRequest>,
) -> CrmResult<(StatusCode, Json<PaymentMethod>)> {
    user.require_admin()?;
    req.validate()?;

    let now = Utc::now();
    let method = PaymentMethod {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        name: req.name.trim().to_string(),
        kind: req.kind,
        fee_percent: req.fee_percent.unwrap_or_else(|| BigDecimal::from(0)),
        max_installments: req.max_installments.unwrap_or(1),
        is_active: req.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(payment_methods::table)
            .values(&method)
            .returning(PaymentMethod::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_payment_method(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<PaymentMethod>> {
    let org_id = user.org_id;
    let method = interact(&state.conn, move |conn| {
        payment_methods::table
            .filter(payment_methods::id.eq(id))
            .filter(payment_methods::org_id.eq(org_id))
            .select(PaymentMethod::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Payment method"))
    })
    .await?;
    Ok(Json(method))
}

async fn update_payment_method(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentMethodRequest>,
) -> CrmResult<Json<PaymentMethod>> {
    user.require_admin()?;
    req.validate()?;

    let changes = PaymentMethodChanges {
        name: req.name.trim().to_string(),
        kind: req.kind,
        fee_percent: req.fee_percent.unwrap_or_else(|| BigDecimal::from(0)),
        max_installments: req.max_installments.unwrap_or(1),
        is_active: req.is_active.unwrap_or(true),
        updated_at: Utc::now(),
    };
    let org_id = user.org_id;

    let method = interact(&state.conn, move |conn| {
        diesel::update(
            payment_methods::table
                .filter(payment_methods::id.eq(id))
                .filter(payment_methods::org_id.eq(org_id)),
        )
        .set(&changes)
        .returning(PaymentMethod::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(CrmError::not_found("Payment method"))
    })
    .await?;
    Ok(Json(method))
}

async fn delete_payment_method(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    user.require_admin()?;
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        let deleted = diesel::delete(
            payment_methods::table
                .filter(payment_methods::id.eq(id))
                .filter(payment_methods::org_id.eq(org_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(CrmError::not_found("Payment method"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
