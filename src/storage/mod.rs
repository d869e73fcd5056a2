//! Presigned upload URLs for S3-compatible storage. Clients PUT files
//! straight to the bucket; every key lives under the tenant's prefix.

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use axum::{extract::State, routing::post, Json, Router};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::config::StorageConfig;
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::state::AppState;

const DEFAULT_FOLDER: &str = "uploads";

#[derive(Clone)]
pub struct UploadSigner {
    client: S3Client,
    bucket: String,
    ttl: Duration,
}

impl UploadSigner {
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "static",
            ));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let base_config = loader.load().await;

        let s3_config = S3ConfigBuilder::from(&base_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            ttl: Duration::from_secs(config.url_ttl_seconds),
        }
    }

    pub async fn presign_put(&self, key: &str, content_type: &str) -> CrmResult<SignedUpload> {
        let presigning = PresigningConfig::expires_in(self.ttl)
            .map_err(|e| CrmError::Internal(format!("Invalid upload URL lifetime: {e}")))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| {
                error!("Failed to presign upload for {key}: {e}");
                CrmError::integration("storage", e.to_string())
            })?;

        let headers = request
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Ok(SignedUpload {
            upload_url: request.uri().to_string(),
            method: request.method().to_string(),
            key: key.to_string(),
            headers,
            expires_in: self.ttl.as_secs(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: String,
    pub folder: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignedUpload {
    pub upload_url: String,
    pub method: String,
    pub key: String,
    pub headers: HashMap<String, String>,
    pub expires_in: u64,
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// `{org_id}/{folder}/{uuid}-{file name}`. Path components in the file
/// name are dropped so a key can never leave the tenant prefix.
pub fn object_key(org_id: Uuid, folder: Option<&str>, filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut name = sanitize_segment(base);
    if name.is_empty() {
        name = "file".to_string();
    }
    let folder = folder
        .map(sanitize_segment)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_FOLDER.to_string());
    format!("{org_id}/{folder}/{}-{name}", Uuid::new_v4())
}

pub fn configure_storage_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/storage/upload-url", post(create_upload_url))
}

async fn create_upload_url(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<UploadUrlRequest>,
) -> CrmResult<Json<SignedUpload>> {
    let signer = state
        .storage
        .as_ref()
        .ok_or(CrmError::NotConfigured { service: "storage" })?;

    Validator::new()
        .string_required(&req.filename, "filename")
        .length(&req.filename, "filename", Some(1), Some(255))
        .string_required(&req.content_type, "content_type")
        .validate()?;
    if !req.content_type.contains('/') {
        return Err(CrmError::Validation("content_type must be a MIME type".to_string()));
    }

    let key = object_key(user.org_id, req.folder.as_deref(), &req.filename);
    let signed = signer.presign_put(&key, req.content_type.trim()).await?;
    debug!("Presigned upload {} for user {}", signed.key, user.user_id);
    Ok(Json(signed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::TestContext;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_key_stays_under_tenant_prefix() {
        let org = Uuid::new_v4();
        let key = object_key(org, Some("../../other"), "../../etc/passwd");
        assert!(key.starts_with(&format!("{org}/other/")));
        assert!(key.ends_with("-passwd"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_key_defaults() {
        let org = Uuid::new_v4();
        let key = object_key(org, None, "Foto do Bolo.png");
        assert!(key.starts_with(&format!("{org}/uploads/")));
        assert!(key.ends_with("-Foto-do-Bolo.png"));

        let key = object_key(org, Some("  "), "///");
        assert!(key.starts_with(&format!("{org}/uploads/")));
        assert!(key.ends_with("-file"));
    }

    #[tokio::test]
    async fn test_upload_url_needs_storage() {
        let ctx = TestContext::new();
        let response = configure_storage_routes()
            .with_state(ctx.state.clone())
            .oneshot(ctx.json_request(
                "POST",
                "/api/storage/upload-url",
                json!({"filename": "a.png", "content_type": "image/png"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
