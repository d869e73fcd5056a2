//! HTTP server initialization and routing

use axum::extract::Request;
use axum::Router;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::configure_health_routes;
use crate::security::create_cors_layer;
use crate::shared::state::AppState;

/// Every feature router, merged and bound to the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .merge(configure_health_routes())
        .merge(crate::auth::configure_auth_routes())
        .merge(crate::funnel::configure_funnel_routes())
        .merge(crate::leads::configure_leads_routes())
        .merge(crate::followups::configure_followups_routes())
        .merge(crate::products::configure_products_routes())
        .merge(crate::finance::configure_finance_routes())
        .merge(crate::teams::configure_teams_routes())
        .merge(crate::attendance::configure_attendance_routes())
        .merge(crate::billing::configure_billing_routes())
        .merge(crate::whatsapp::configure_whatsapp_routes())
        .merge(crate::storage::configure_storage_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            tracing::info_span!("http", method = %req.method(), uri = %req.uri())
        }))
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = state
        .config
        .bind_address()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("Invalid bind address: {e}")))?;

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e);
        }
    };
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::TestContext;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let ctx = TestContext::new();
        let app = build_router(ctx.state.clone());
        for uri in ["/api/leads", "/api/products", "/api/finance/dashboard", "/api/teams"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let ctx = TestContext::new();
        let response = build_router(ctx.state.clone())
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
