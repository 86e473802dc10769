//! Operational HTTP surface for huddle.
//!
//! A single liveness route reporting whether the platform event stream is
//! connected. The status is always 200; the body carries the state, which
//! is what the deployment's probes read.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use huddle_config::GatewayConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub const HEALTHY_BODY: &str = "OK";
pub const DISCONNECTED_BODY: &str = "WebSocket Disconnected";

/// Shared application state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    /// Raised while the event stream listener is running
    pub connected: Arc<AtomicBool>,
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<GatewayState>) -> &'static str {
    if state.connected.load(Ordering::SeqCst) {
        HEALTHY_BODY
    } else {
        DISCONNECTED_BODY
    }
}

/// Start the gateway HTTP server. Runs until the listener fails.
pub async fn start(config: &GatewayConfig, connected: Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(GatewayState { connected });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Health endpoint listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn probe(connected: bool) -> (StatusCode, String) {
        let state = GatewayState {
            connected: Arc::new(AtomicBool::new(connected)),
        };
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = build_router(state).oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_connected() {
        assert_eq!(probe(true).await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn health_reports_disconnected_with_200() {
        assert_eq!(
            probe(false).await,
            (StatusCode::OK, "WebSocket Disconnected".to_string())
        );
    }

    #[tokio::test]
    async fn health_follows_flag_changes() {
        let connected = Arc::new(AtomicBool::new(false));
        let app = build_router(GatewayState {
            connected: connected.clone(),
        });

        connected.store(true, Ordering::SeqCst);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let body = app.oneshot(req).await.unwrap().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = GatewayState {
            connected: Arc::new(AtomicBool::new(true)),
        };
        let req = Request::builder().uri("/v1/chat").body(Body::empty()).unwrap();
        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
