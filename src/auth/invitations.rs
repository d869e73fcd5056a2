use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    find_user_by_email, hash_off_thread, issue_session, verify_off_thread, OrgMember, Organization,
    SessionResponse, User,
};
use crate::security::auth::{AuthUser, MemberRole};
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{org_invitations, org_members, organizations, users};
use crate::shared::state::AppState;
use crate::shared::utils::{interact, random_token};

pub const INVITATION_TTL_DAYS: i64 = 7;
const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = org_invitations)]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn check_usable(&self, now: DateTime<Utc>) -> CrmResult<()> {
        if self.accepted_at.is_some() {
            return Err(CrmError::Conflict("Invitation was already accepted".to_string()));
        }
        if self.expires_at <= now {
            return Err(CrmError::Validation("Invitation has expired".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    #[serde(default = "default_invite_role")]
    pub role: MemberRole,
}

fn default_invite_role() -> MemberRole {
    MemberRole::Member
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub accept_url: String,
    pub email_sent: bool,
}

/// Accepting creates the account when the email is unknown (`full_name`
/// required) or checks the password of the existing account.
#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
    pub full_name: Option<String>,
}

pub fn configure_invitation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/invitations", post(create_invitation))
        .route("/api/auth/invitations/accept", post(accept_invitation))
}

fn accept_url(base_url: &str, token: &str) -> String {
    format!("{}/invite/{token}", base_url.trim_end_matches('/'))
}

async fn create_invitation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<InviteRequest>,
) -> CrmResult<(StatusCode, Json<InviteResponse>)> {
    user.require_admin()?;
    let email = req.email.trim().to_lowercase();
    Validator::new().email(&email).validate()?;
    if req.role == MemberRole::Owner {
        return Err(CrmError::Validation("Owners cannot be invited".to_string()));
    }

    let now = Utc::now();
    let invitation = Invitation {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        email,
        role: req.role.as_str().to_string(),
        token: random_token(TOKEN_LENGTH),
        invited_by: user.user_id,
        expires_at: now + Duration::days(INVITATION_TTL_DAYS),
        accepted_at: None,
        created_at: now,
    };

    let (invitation, org_name) = interact(&state.conn, move |conn| {
        let already_member: i64 = org_members::table
            .inner_join(users::table)
            .filter(org_members::org_id.eq(invitation.org_id))
            .filter(users::email.eq(&invitation.email))
            .count()
            .get_result(conn)?;
        if already_member > 0 {
            return Err(CrmError::Conflict(
                "This email already belongs to a member".to_string(),
            ));
        }

        let org_name: String = organizations::table
            .find(invitation.org_id)
            .select(organizations::name)
            .first(conn)?;
        let created = diesel::insert_into(org_invitations::table)
            .values(&invitation)
            .returning(Invitation::as_returning())
            .get_result(conn)?;
        Ok((created, org_name))
    })
    .await?;

    let url = accept_url(&state.config.server.base_url, &invitation.token);
    let email_sent = match &state.email {
        Some(client) => match client
            .send_invitation(&invitation.email, &org_name, &user.email, &url)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Invitation {} created but email failed: {e}", invitation.id);
                false
            }
        },
        None => false,
    };

    info!("Invitation {} created for org {}", invitation.id, invitation.org_id);
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            invitation,
            accept_url: url,
            email_sent,
        }),
    ))
}

enum Invitee {
    Existing(User),
    New { full_name: String, password_hash: String },
}

async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AcceptInvitationRequest>,
) -> CrmResult<Json<SessionResponse>> {
    Validator::new()
        .string_required(&req.token, "token")
        .string_required(&req.password, "password")
        .validate()?;

    let token = req.token.trim().to_string();
    let (invitation, existing) = interact(&state.conn, move |conn| {
        let invitation: Invitation = org_invitations::table
            .filter(org_invitations::token.eq(&token))
            .select(Invitation::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Invitation"))?;
        let existing = find_user_by_email(conn, &invitation.email)?;
        Ok((invitation, existing))
    })
    .await?;
    invitation.check_usable(Utc::now())?;
    let role: MemberRole = invitation.role.parse()?;

    let invitee = match existing {
        Some(user) => {
            if !verify_off_thread(req.password, user.password_hash.clone()).await? {
                return Err(CrmError::Unauthorized);
            }
            Invitee::Existing(user)
        }
        None => {
            let full_name = req.full_name.unwrap_or_default().trim().to_string();
            Validator::new()
                .string_required(&full_name, "full_name")
                .length(&full_name, "full_name", Some(2), Some(120))
                .password(&req.password)
                .validate()?;
            let password_hash = hash_off_thread(req.password).await?;
            Invitee::New {
                full_name,
                password_hash,
            }
        }
    };

    let invitation_id = invitation.id;
    let (user, organization) = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            // Re-read under lock so a token is consumed only once.
            let invitation: Invitation = org_invitations::table
                .find(invitation_id)
                .select(Invitation::as_select())
                .for_update()
                .first(conn)?;
            let now = Utc::now();
            invitation.check_usable(now)?;

            let user = match invitee {
                Invitee::Existing(user) => user,
                Invitee::New {
                    full_name,
                    password_hash,
                } => {
                    let user = User {
                        id: Uuid::new_v4(),
                        email: invitation.email.clone(),
                        full_name,
                        password_hash,
                        created_at: now,
                        updated_at: now,
                    };
                    diesel::insert_into(users::table).values(&user).execute(conn)?;
                    user
                }
            };

            diesel::insert_into(org_members::table)
                .values(&OrgMember {
                    org_id: invitation.org_id,
                    user_id: user.id,
                    role: invitation.role.clone(),
                    created_at: now,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            diesel::update(org_invitations::table.find(invitation.id))
                .set(org_invitations::accepted_at.eq(Some(now)))
                .execute(conn)?;

            let organization: Organization = organizations::table
                .find(invitation.org_id)
                .select(Organization::as_select())
                .first(conn)?;
            Ok((user, organization))
        })
    })
    .await?;

    info!("User {} joined org {} as {}", user.id, organization.id, role.as_str());
    Ok(Json(issue_session(&state, &user, organization, role)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::TestContext;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::json;
    use tower::ServiceExt;

    fn invitation(expires_in: Duration, accepted: bool) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            email: "bia@example.com".to_string(),
            role: "member".to_string(),
            token: random_token(TOKEN_LENGTH),
            invited_by: Uuid::new_v4(),
            expires_at: now + expires_in,
            accepted_at: accepted.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn test_usable_only_when_pending_and_fresh() {
        let now = Utc::now();
        assert!(invitation(Duration::days(1), false).check_usable(now).is_ok());
        assert!(matches!(
            invitation(Duration::days(1), true).check_usable(now),
            Err(CrmError::Conflict(_))
        ));
        assert!(matches!(
            invitation(Duration::seconds(-1), false).check_usable(now),
            Err(CrmError::Validation(_))
        ));
    }

    #[test]
    fn test_token_is_never_serialized() {
        let value = serde_json::to_value(invitation(Duration::days(1), false)).expect("serialize");
        assert!(value.get("token").is_none());
        assert_eq!(value["email"], "bia@example.com");
    }

    #[test]
    fn test_accept_url_joins_base() {
        assert_eq!(
            accept_url("https://crm.example.com/", "abc"),
            "https://crm.example.com/invite/abc"
        );
    }

    #[tokio::test]
    async fn test_owner_role_cannot_be_invited() {
        let ctx = TestContext::new();
        let response = configure_invitation_routes()
            .with_state(ctx.state.clone())
            .oneshot(ctx.json_request(
                "POST",
                "/api/auth/invitations",
                json!({"email": "new@example.com", "role": "owner"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_accept_requires_token_and_password() {
        let ctx = TestContext::new();
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/invitations/accept")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"token": "", "password": ""}).to_string()))
            .expect("request");
        let response = configure_invitation_routes()
            .with_state(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
