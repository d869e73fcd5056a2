//! Accounts and tenancy: signup, login, token refresh and invitations.

pub mod invitations;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::forms::{LoginForm, SignupForm};
use crate::funnel::api::insert_default_stages;
use crate::security::auth::{AuthUser, MemberRole};
use crate::security::jwt::{TokenPair, TokenType};
use crate::security::password::{hash_password, verify_password};
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{org_members, organizations, users};
use crate::shared::state::AppState;
use crate::shared::utils::{interact, random_token, slugify};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = org_members)]
pub struct OrgMember {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl OrgMember {
    pub fn member_role(&self) -> CrmResult<MemberRole> {
        self.role.parse()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserProfile,
    pub organization: Organization,
    pub role: MemberRole,
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
    pub organization: Organization,
    pub role: MemberRole,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/me", get(me))
        .merge(invitations::configure_invitation_routes())
}

/// Runs Argon2 on the blocking pool.
pub(crate) async fn hash_off_thread(password: String) -> CrmResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

pub(crate) async fn verify_off_thread(password: String, hash: String) -> CrmResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?
}

pub(crate) fn find_user_by_email(conn: &mut PgConnection, email: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email.eq(email))
        .select(User::as_select())
        .first(conn)
        .optional()
}

pub(crate) fn load_membership(
    conn: &mut PgConnection,
    org_id: Uuid,
    user_id: Uuid,
) -> QueryResult<Option<(Organization, OrgMember)>> {
    organizations::table
        .inner_join(org_members::table)
        .filter(org_members::org_id.eq(org_id))
        .filter(org_members::user_id.eq(user_id))
        .select((Organization::as_select(), OrgMember::as_select()))
        .first(conn)
        .optional()
}

/// Picks a slug not yet taken, suffixing a short random tag on collision.
fn unique_slug(conn: &mut PgConnection, name: &str) -> QueryResult<String> {
    let base = match slugify(name) {
        s if s.is_empty() => "org".to_string(),
        s => s,
    };
    let mut candidate = base.clone();
    loop {
        let taken: i64 = organizations::table
            .filter(organizations::slug.eq(&candidate))
            .count()
            .get_result(conn)?;
        if taken == 0 {
            return Ok(candidate);
        }
        candidate = format!("{base}-{}", random_token(4).to_lowercase());
    }
}

pub(crate) fn issue_session(
    state: &AppState,
    user: &User,
    organization: Organization,
    role: MemberRole,
) -> CrmResult<SessionResponse> {
    let tokens = state.jwt.issue_pair(user.id, organization.id, role, &user.email)?;
    Ok(SessionResponse {
        user: UserProfile::from(user),
        organization,
        role,
        tokens,
    })
}

/// Creates the organization, its owner and the default funnel stages in a
/// single transaction.
async fn signup(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SignupForm>,
) -> CrmResult<(StatusCode, Json<SessionResponse>)> {
    form.validate()?;
    let email = form.email.trim().to_lowercase();
    let password_hash = hash_off_thread(form.password.clone()).await?;

    let now = Utc::now();
    let org_name = form.organization_name.trim().to_string();
    let full_name = form.full_name.trim().to_string();

    let (user, organization) = interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            if find_user_by_email(conn, &email)?.is_some() {
                return Err(CrmError::Conflict("Email is already registered".to_string()));
            }

            let organization = Organization {
                id: Uuid::new_v4(),
                slug: unique_slug(conn, &org_name)?,
                name: org_name,
                stripe_customer_id: None,
                created_at: now,
                updated_at: now,
            };
            let user = User {
                id: Uuid::new_v4(),
                email,
                full_name,
                password_hash,
                created_at: now,
                updated_at: now,
            };

            diesel::insert_into(organizations::table)
                .values(&organization)
                .execute(conn)?;
            diesel::insert_into(users::table).values(&user).execute(conn)?;
            diesel::insert_into(org_members::table)
                .values(&OrgMember {
                    org_id: organization.id,
                    user_id: user.id,
                    role: MemberRole::Owner.as_str().to_string(),
                    created_at: now,
                })
                .execute(conn)?;
            insert_default_stages(conn, organization.id)?;

            Ok((user, organization))
        })
    })
    .await?;

    info!("Organization {} ({}) created by user {}", organization.id, organization.slug, user.id);
    let session = issue_session(&state, &user, organization, MemberRole::Owner)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(form): Json<LoginForm>,
) -> CrmResult<Json<SessionResponse>> {
    form.validate()?;
    let email = form.email.trim().to_lowercase();
    let slug = form.organization.clone();

    let found = interact(&state.conn, move |conn| {
        let Some(user) = find_user_by_email(conn, &email)? else {
            return Ok(None);
        };
        let mut q = organizations::table
            .inner_join(org_members::table)
            .filter(org_members::user_id.eq(user.id))
            .select((Organization::as_select(), OrgMember::as_select()))
            .into_boxed();
        if let Some(slug) = slug {
            q = q.filter(organizations::slug.eq(slug));
        }
        let membership = q.order(org_members::created_at.asc()).first(conn).optional()?;
        Ok(Some((user, membership)))
    })
    .await?;

    // Unknown email, wrong password and missing membership all look the same
    // to the caller.
    let Some((user, membership)) = found else {
        return Err(CrmError::Unauthorized);
    };
    if !verify_off_thread(form.password, user.password_hash.clone()).await? {
        warn!("Failed login for user {}", user.id);
        return Err(CrmError::Unauthorized);
    }
    let Some((organization, member)) = membership else {
        return Err(CrmError::Unauthorized);
    };

    let role = member.member_role()?;
    Ok(Json(issue_session(&state, &user, organization, role)?))
}

/// Exchanges a refresh token for a new pair. Membership and role are read
/// again so revoked or demoted members do not keep their old access.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> CrmResult<Json<SessionResponse>> {
    let claims = state.jwt.verify(&req.refresh_token, TokenType::Refresh)?;
    let (user_id, org_id) = (claims.sub, claims.org);

    let found = interact(&state.conn, move |conn| {
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .optional()?;
        let membership = load_membership(conn, org_id, user_id)?;
        Ok(user.zip(membership))
    })
    .await?;

    let (user, (organization, member)) = found.ok_or(CrmError::Unauthorized)?;
    let role = member.member_role()?;
    Ok(Json(issue_session(&state, &user, organization, role)?))
}

async fn me(State(state): State<Arc<AppState>>, auth: AuthUser) -> CrmResult<Json<MeResponse>> {
    let (user_id, org_id) = (auth.user_id, auth.org_id);
    let found = interact(&state.conn, move |conn| {
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .optional()?;
        let membership = load_membership(conn, org_id, user_id)?;
        Ok(user.zip(membership))
    })
    .await?;

    let (user, (organization, member)) = found.ok_or(CrmError::Unauthorized)?;
    Ok(Json(MeResponse {
        user: UserProfile::from(&user),
        organization,
        role: member.member_role()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::{read_json, TestContext};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::json;
    use tower::ServiceExt;

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_signup_validates_before_touching_storage() {
        let ctx = TestContext::new();
        let response = configure_auth_routes()
            .with_state(ctx.state.clone())
            .oneshot(post(
                "/api/auth/signup",
                json!({
                    "organization_name": "Doces da Vó",
                    "full_name": "Ana Lima",
                    "email": "ana@example.com",
                    "password": "secret123",
                    "password_confirmation": "secret124"
                }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = read_json(response).await;
        assert!(body["details"]["password_confirmation"].is_string());
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let ctx = TestContext::new();
        let response = configure_auth_routes()
            .with_state(ctx.state.clone())
            .oneshot(post("/api/auth/refresh", json!({"refresh_token": ctx.token()})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let ctx = TestContext::new();
        let request = Request::builder()
            .uri("/api/auth/me")
            .body(Body::empty())
            .expect("request");
        let response = configure_auth_routes()
            .with_state(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_member_role_parses_stored_text() {
        let member = OrgMember {
            org_id: Uuid::nil(),
            user_id: Uuid::nil(),
            role: "admin".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(member.member_role().ok(), Some(MemberRole::Admin));
    }
}
