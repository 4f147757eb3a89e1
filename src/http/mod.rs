//! HTTP control surface over the session.

pub mod error;
pub mod middleware;
pub mod routes;

#[cfg(test)]
mod tests;

use std::future::Future;

use axum::extract::Request;
use axum::middleware::{Next, from_fn};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::session::SessionManager;

pub use error::ApiError;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `x-api-key`. `None` leaves the API open.
    pub api_key: Option<String>,
    /// Allowed CORS origin; `None` or `"*"` allows any.
    pub cors_origin: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            api_key: None,
            cors_origin: None,
        }
    }
}

pub fn build_router(session: SessionManager, config: &HttpConfig) -> Router {
    let mut protected = Router::new()
        .route("/status", get(routes::status))
        .route("/pair", post(routes::pair))
        .route("/send", post(routes::send))
        .route("/logout", post(routes::logout));

    if let Some(api_key) = config.api_key.clone() {
        protected = protected.route_layer(from_fn(move |req: Request, next: Next| {
            let api_key = api_key.clone();
            async move { middleware::require_api_key(req, next, &api_key).await }
        }));
    }

    Router::new()
        .route("/", get(routes::health))
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(Extension(session))
        .layer(middleware::build_cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` until `shutdown` resolves.
pub async fn serve(
    router: Router,
    config: &HttpConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 Control API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
