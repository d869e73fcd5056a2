//! Receptive attendances: inbound customer contacts registered by an
//! attendant, optionally converted into a lead.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::forms::{clean, LeadForm};
use crate::funnel::LeadStage;
use crate::leads::{self, Lead};
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::receptive_attendances;
use crate::shared::state::AppState;
use crate::shared::utils::{interact, normalize_phone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Phone,
    Whatsapp,
    Instagram,
    WalkIn,
    Email,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Open,
    Resolved,
    Lost,
    Converted,
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!("Unknown {}: {s}", stringify!($ty))),
                }
            }
        }

        impl ToSql<Text, Pg> for $ty {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $ty {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                value.parse().map_err(Into::into)
            }
        }
    };
}

text_enum!(Channel {
    Phone => "phone",
    Whatsapp => "whatsapp",
    Instagram => "instagram",
    WalkIn => "walk_in",
    Email => "email",
    Other => "other",
});

text_enum!(Outcome {
    Open => "open",
    Resolved => "resolved",
    Lost => "lost",
    Converted => "converted",
});

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = receptive_attendances)]
pub struct Attendance {
    pub id: Uuid,
    pub org_id: Uuid,
    pub attendant_id: Uuid,
    pub customer_name: String,
    pub phone: Option<String>,
    pub channel: Channel,
    pub product_id: Option<Uuid>,
    pub reason: Option<String>,
    pub outcome: Outcome,
    pub lead_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAttendanceRequest {
    pub customer_name: String,
    pub phone: Option<String>,
    pub channel: Channel,
    pub product_id: Option<Uuid>,
    pub reason: Option<String>,
    pub outcome: Option<Outcome>,
}

/// `from` and `to` are inclusive calendar days (UTC).
#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub attendant_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertRequest {
    pub stage: Option<LeadStage>,
    pub assigned_to: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversionResult {
    pub attendance: Attendance,
    pub lead: Lead,
}

impl AttendanceQuery {
    fn bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let start = self.from.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
        let end = self
            .to
            .and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        (start, end)
    }
}

/// Lead form derived from an attendance. The reason of the contact becomes
/// the first note unless the caller supplies one.
pub fn lead_form_for(attendance: &Attendance, req: ConvertRequest) -> LeadForm {
    LeadForm {
        name: attendance.customer_name.clone(),
        phone: attendance.phone.clone(),
        stage: req.stage,
        assigned_to: req.assigned_to.or(Some(attendance.attendant_id)),
        product_id: attendance.product_id,
        notes: clean(req.notes).or_else(|| attendance.reason.clone()),
        source: Some(format!("attendance:{}", attendance.channel.as_str())),
        ..LeadForm::default()
    }
}

pub fn configure_attendance_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/attendances", get(list_attendances).post(create_attendance))
        .route("/api/attendances/:id", get(get_attendance))
        .route("/api/attendances/:id/convert", post(convert_attendance))
}

async fn load_attendance(state: &AppState, org_id: Uuid, id: Uuid) -> CrmResult<Attendance> {
    interact(&state.conn, move |conn| {
        receptive_attendances::table
            .filter(receptive_attendances::id.eq(id))
            .filter(receptive_attendances::org_id.eq(org_id))
            .select(Attendance::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Attendance"))
    })
    .await
}

async fn list_attendances(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<AttendanceQuery>,
) -> CrmResult<Json<Vec<Attendance>>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(CrmError::Validation("'from' must not be after 'to'".to_string()));
        }
    }
    let (start, end) = query.bounds();
    let org_id = user.org_id;
    let attendant = query.attendant_id;

    let rows = interact(&state.conn, move |conn| {
        let mut q = receptive_attendances::table
            .filter(receptive_attendances::org_id.eq(org_id))
            .select(Attendance::as_select())
            .into_boxed();
        if let Some(start) = start {
            q = q.filter(receptive_attendances::created_at.ge(start));
        }
        if let Some(end) = end {
            q = q.filter(receptive_attendances::created_at.lt(end));
        }
        if let Some(attendant) = attendant {
            q = q.filter(receptive_attendances::attendant_id.eq(attendant));
        }
        let rows = q.order(receptive_attendances::created_at.desc()).load(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(rows))
}

async fn create_attendance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateAttendanceRequest>,
) -> CrmResult<(StatusCode, Json<Attendance>)> {
    Validator::new()
        .string_required(&req.customer_name, "customer_name")
        .length(&req.customer_name, "customer_name", Some(2), Some(120))
        .optional_phone(req.phone.as_deref())
        .validate()?;
    if req.outcome == Some(Outcome::Converted) {
        return Err(CrmError::Validation(
            "Use the convert operation to turn an attendance into a lead".to_string(),
        ));
    }

    let attendance = Attendance {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        attendant_id: user.user_id,
        customer_name: req.customer_name.trim().to_string(),
        phone: clean(req.phone).map(|p| normalize_phone(&p)),
        channel: req.channel,
        product_id: req.product_id,
        reason: clean(req.reason),
        outcome: req.outcome.unwrap_or_default(),
        lead_id: None,
        created_at: Utc::now(),
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(receptive_attendances::table)
            .values(&attendance)
            .returning(Attendance::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_attendance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Attendance>> {
    Ok(Json(load_attendance(&state, user.org_id, id).await?))
}

/// Creates a lead from the attendance and links the two. The link is only
/// written when the attendance is still unconverted; a lost race removes the
/// extra lead again.
async fn convert_attendance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<ConvertRequest>>,
) -> CrmResult<Json<ConversionResult>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let attendance = load_attendance(&state, user.org_id, id).await?;
    if attendance.lead_id.is_some() {
        return Err(CrmError::Conflict("Attendance was already converted".to_string()));
    }

    let lead = leads::service::create_lead(state.leads.as_ref(), &user, lead_form_for(&attendance, req)).await?;

    let org_id = user.org_id;
    let lead_id = lead.id;
    let linked = interact(&state.conn, move |conn| {
        let row = diesel::update(
            receptive_attendances::table
                .filter(receptive_attendances::id.eq(id))
                .filter(receptive_attendances::org_id.eq(org_id))
                .filter(receptive_attendances::lead_id.is_null()),
        )
        .set((
            receptive_attendances::lead_id.eq(Some(lead_id)),
            receptive_attendances::outcome.eq(Outcome::Converted),
        ))
        .returning(Attendance::as_returning())
        .get_result(conn)
        .optional()?;
        Ok(row)
    })
    .await?;

    match linked {
        Some(attendance) => {
            info!("Attendance {} converted into lead {}", attendance.id, lead.id);
            Ok(Json(ConversionResult { attendance, lead }))
        }
        None => {
            warn!("Attendance {id} converted concurrently, discarding lead {}", lead.id);
            state.leads.delete(org_id, lead.id).await?;
            Err(CrmError::Conflict("Attendance was already converted".to_string()))
        }
    }
}
