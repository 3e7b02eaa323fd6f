use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::routes::AppState;

/// HTTP header carrying the API secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware rejecting requests without the configured API key.
///
/// Auth is skipped in dashboard mode or when no key is configured. The
/// header is compared byte-exact against the configured value.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let config = &state.service.config;
    if config.dashboard || config.api_key.is_empty() {
        return next.run(request).await;
    }
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| value.as_bytes());
    if presented == Some(config.api_key.as_bytes()) {
        next.run(request).await
    } else {
        tracing::error!("Unauthorized request: missing or wrong API key");
        AppError::Unauthorized.into_response()
    }
}
