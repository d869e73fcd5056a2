use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::JwtSettings;
use crate::security::auth::MemberRole;
use crate::shared::error::CrmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub org: Uuid,
    pub role: MemberRole,
    pub email: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl Claims {
    fn new(
        user_id: Uuid,
        org_id: Uuid,
        role: MemberRole,
        email: &str,
        issuer: &str,
        token_type: TokenType,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id,
            org: org_id,
            role,
            email: email.to_string(),
            iss: issuer.to_string(),
            exp: expiry.timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

pub struct JwtManager {
    issuer: String,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            issuer: settings.issuer.clone(),
            access_ttl_minutes: settings.access_ttl_minutes,
            refresh_ttl_days: settings.refresh_ttl_days,
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
        }
    }

    fn encode(&self, claims: &Claims) -> Result<String, CrmError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| CrmError::Internal(format!("Failed to encode token: {e}")))
    }

    pub fn issue_pair(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: MemberRole,
        email: &str,
    ) -> Result<TokenPair, CrmError> {
        let now = Utc::now();
        let access_expiry = now + Duration::minutes(self.access_ttl_minutes);
        let refresh_expiry = now + Duration::days(self.refresh_ttl_days);

        let access = Claims::new(
            user_id,
            org_id,
            role,
            email,
            &self.issuer,
            TokenType::Access,
            access_expiry,
        );
        let refresh = Claims::new(
            user_id,
            org_id,
            role,
            email,
            &self.issuer,
            TokenType::Refresh,
            refresh_expiry,
        );

        debug!("Issued token pair for user {user_id} in org {org_id}");

        Ok(TokenPair {
            access_token: self.encode(&access)?,
            refresh_token: self.encode(&refresh)?,
            token_type: "Bearer".into(),
            expires_in: self.access_ttl_minutes * 60,
            refresh_expires_in: self.refresh_ttl_days * 24 * 60 * 60,
        })
    }

    /// Decodes a token and checks signature, issuer, expiry and type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, CrmError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 30;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("Token validation failed: {e}");
            CrmError::Unauthorized
        })?;

        if data.claims.token_type != expected {
            return Err(CrmError::Unauthorized);
        }

        Ok(data.claims)
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
