use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::security::jwt::{extract_bearer_token, TokenType};
use crate::shared::error::CrmError;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl FromStr for MemberRole {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(CrmError::Validation(format!("Unknown role: {other}"))),
        }
    }
}

/// Caller identity resolved from the bearer token. Every tenant-scoped query
/// filters on `org_id`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: MemberRole,
    pub email: String,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), CrmError> {
        if self.role.can_manage() {
            Ok(())
        } else {
            Err(CrmError::Forbidden(
                "This action requires an owner or admin".to_string(),
            ))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = CrmError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or(CrmError::Unauthorized)?;

        let claims = state.jwt.verify(token, TokenType::Access)?;

        Ok(Self {
            user_id: claims.sub,
            org_id: claims.org,
            role: claims.role,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::TestContext;
    use axum::http::Request;

    async fn extract(ctx: &TestContext, header: Option<String>) -> Result<AuthUser, CrmError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).expect("request").into_parts();
        AuthUser::from_request_parts(&mut parts, &ctx.state).await
    }

    #[tokio::test]
    async fn test_valid_token_resolves_tenant() {
        let ctx = TestContext::new();
        let user = extract(&ctx, Some(format!("Bearer {}", ctx.token())))
            .await
            .expect("authenticated");
        assert_eq!(user.org_id, ctx.org_id);
        assert_eq!(user.user_id, ctx.user_id);
        assert!(user.require_admin().is_ok());
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let ctx = TestContext::new();
        assert!(matches!(extract(&ctx, None).await, Err(CrmError::Unauthorized)));
        assert!(matches!(
            extract(&ctx, Some("Bearer garbage".to_string())).await,
            Err(CrmError::Unauthorized)
        ));
    }

    #[test]
    fn test_member_cannot_manage() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            role: MemberRole::Member,
            email: "m@example.com".to_string(),
        };
        assert!(matches!(user.require_admin(), Err(CrmError::Forbidden(_))));
        assert_eq!("admin".parse::<MemberRole>().ok(), Some(MemberRole::Admin));
        assert!("root".parse::<MemberRole>().is_err());
    }
}
