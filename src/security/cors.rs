use axum::http::{header, HeaderValue, Method};
use log::{info, warn};
use tower_http::cors::CorsLayer;

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<header::HeaderName>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                header::ORIGIN,
            ],
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Origins that fail to parse as header values are dropped with a
    /// warning. An empty list yields a permissive layer for development.
    pub fn build(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {o:?}");
                    None
                }
            })
            .collect();

        if origins.is_empty() {
            info!("Creating CORS layer with development defaults (no origins configured)");
            return CorsLayer::permissive();
        }

        info!("CORS configured with {} allowed origins", origins.len());
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(self.allowed_methods)
            .allow_headers(self.allowed_headers)
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(self.max_age_secs))
    }
}

pub fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    CorsConfig::default()
        .with_origins(allowed_origins.to_vec())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CorsConfig::default();
        assert!(config.allowed_origins.is_empty());
        assert!(config.allowed_methods.contains(&Method::PATCH));
        assert!(config.allowed_headers.contains(&header::AUTHORIZATION));
    }

    #[test]
    fn test_with_origins() {
        let config = CorsConfig::default().with_origins(vec!["https://app.example.com".into()]);
        assert_eq!(config.allowed_origins.len(), 1);
        let _layer = config.build();
    }
}
