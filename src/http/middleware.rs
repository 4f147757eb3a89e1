use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use super::{ApiError, HttpConfig};

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(req: Request, next: Next, api_key: &str) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(api_key) {
        warn!("Rejected {} {}: bad API key", req.method(), req.uri().path());
        return ApiError::Unauthorized.into_response();
    }

    next.run(req).await
}

pub fn build_cors_layer(config: &HttpConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match config.cors_origin.as_deref() {
        None | Some("*") => layer.allow_origin(Any),
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
            Err(_) => {
                warn!("Invalid CORS origin {:?}, allowing any", origin);
                layer.allow_origin(Any)
            }
        },
    }
}
