use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::leads::models::double_option;
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{org_members, team_members, teams, users};
use crate::shared::state::AppState;
use crate::shared::utils::interact;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = teams)]
pub struct Team {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub leader_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = team_members)]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub leader_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = teams)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub leader_id: Option<Option<Uuid>>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

pub fn configure_teams_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/teams", get(list_teams).post(create_team))
        .route(
            "/api/teams/:id",
            get(get_team).put(update_team).delete(delete_team),
        )
        .route("/api/teams/:id/members", post(add_member))
        .route("/api/teams/:id/members/:user_id", delete(remove_member))
}

fn validate_name(name: &str) -> CrmResult<()> {
    Validator::new()
        .string_required(name, "name")
        .length(name, "name", Some(2), Some(80))
        .validate()?;
    Ok(())
}

fn is_org_member(conn: &mut PgConnection, org_id: Uuid, user_id: Uuid) -> QueryResult<bool> {
    let count: i64 = org_members::table
        .filter(org_members::org_id.eq(org_id))
        .filter(org_members::user_id.eq(user_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

fn find_team(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> CrmResult<Team> {
    teams::table
        .filter(teams::id.eq(id))
        .filter(teams::org_id.eq(org_id))
        .select(Team::as_select())
        .first(conn)
        .optional()?
        .ok_or(CrmError::not_found("Team"))
}

fn load_members(conn: &mut PgConnection, team_id: Uuid) -> QueryResult<Vec<MemberSummary>> {
    let rows: Vec<(Uuid, String, String)> = team_members::table
        .inner_join(users::table.on(users::id.eq(team_members::user_id)))
        .filter(team_members::team_id.eq(team_id))
        .select((users::id, users::full_name, users::email))
        .order(users::full_name.asc())
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(user_id, full_name, email)| MemberSummary {
            user_id,
            full_name,
            email,
        })
        .collect())
}

async fn list_teams(State(state): State<Arc<AppState>>, user: AuthUser) -> CrmResult<Json<Vec<Team>>> {
    let org_id = user.org_id;
    let rows = interact(&state.conn, move |conn| {
        let rows = teams::table
            .filter(teams::org_id.eq(org_id))
            .select(Team::as_select())
            .order(teams::name.asc())
            .load(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(rows))
}

async fn create_team(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateTeamRequest>,
) -> CrmResult<(StatusCode, Json<Team>)> {
    user.require_admin()?;
    validate_name(&req.name)?;

    let now = Utc::now();
    let team = Team {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        name: req.name.trim().to_string(),
        leader_id: req.leader_id,
        created_at: now,
        updated_at: now,
    };

    let created = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            if let Some(leader_id) = team.leader_id {
                if !is_org_member(conn, team.org_id, leader_id)? {
                    return Err(CrmError::Validation(
                        "Team leader is not a member of this organization".to_string(),
                    ));
                }
            }

            let created = diesel::insert_into(teams::table)
                .values(&team)
                .returning(Team::as_returning())
                .get_result(conn)?;

            // The leader is always part of the team.
            if let Some(leader_id) = created.leader_id {
                diesel::insert_into(team_members::table)
                    .values(&TeamMember {
                        team_id: created.id,
                        user_id: leader_id,
                        org_id: created.org_id,
                        created_at: now,
                    })
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            Ok(created)
        })
    })
    .await?;

    info!("Team {} created in org {}", created.id, created.org_id);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_team(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<TeamDetail>> {
    let org_id = user.org_id;
    let detail = interact(&state.conn, move |conn| {
        let team = find_team(conn, org_id, id)?;
        let members = load_members(conn, team.id)?;
        Ok(TeamDetail { team, members })
    })
    .await?;
    Ok(Json(detail))
}

async fn update_team(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateTeamRequest>,
) -> CrmResult<Json<Team>> {
    user.require_admin()?;
    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    req.name = req.name.map(|n| n.trim().to_string());
    req.updated_at = Some(Utc::now());
    let org_id = user.org_id;

    let team = interact(&state.conn, move |conn| {
        if let Some(Some(leader_id)) = req.leader_id {
            if !is_org_member(conn, org_id, leader_id)? {
                return Err(CrmError::Validation(
                    "Team leader is not a member of this organization".to_string(),
                ));
            }
        }
        diesel::update(
            teams::table
                .filter(teams::id.eq(id))
                .filter(teams::org_id.eq(org_id)),
        )
        .set(&req)
        .returning(Team::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(CrmError::not_found("Team"))
    })
    .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    user.require_admin()?;
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            let team = find_team(conn, org_id, id)?;
            diesel::delete(team_members::table.filter(team_members::team_id.eq(team.id))).execute(conn)?;
            diesel::delete(teams::table.find(team.id)).execute(conn)?;
            Ok(())
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> CrmResult<Json<TeamDetail>> {
    user.require_admin()?;
    let org_id = user.org_id;

    let detail = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            let team = find_team(conn, org_id, id)?;
            if !is_org_member(conn, org_id, req.user_id)? {
                return Err(CrmError::Validation(
                    "User is not a member of this organization".to_string(),
                ));
            }
            diesel::insert_into(team_members::table)
                .values(&TeamMember {
                    team_id: team.id,
                    user_id: req.user_id,
                    org_id,
                    created_at: Utc::now(),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            let members = load_members(conn, team.id)?;
            Ok(TeamDetail { team, members })
        })
    })
    .await?;
    Ok(Json(detail))
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, member_id)): Path<(Uuid, Uuid)>,
) -> CrmResult<StatusCode> {
    user.require_admin()?;
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            let team = find_team(conn, org_id, id)?;
            let removed = diesel::delete(
                team_members::table
                    .filter(team_members::team_id.eq(team.id))
                    .filter(team_members::user_id.eq(member_id)),
            )
            .execute(conn)?;
            if removed == 0 {
                return Err(CrmError::not_found("Team member"));
            }
            if team.leader_id == Some(member_id) {
                diesel::update(teams::table.find(team.id))
                    .set((teams::leader_id.eq(None::<Uuid>), teams::updated_at.eq(Utc::now())))
                    .execute(conn)?;
            }
            Ok(())
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
