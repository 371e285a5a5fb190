//! PSK-based authentication for the `/api` routes.
//!
//! Keys are compared in constant time.

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware that admits requests carrying the expected key.
///
/// The key may come from `x-api-key` or an `Authorization: Bearer` header.
/// With no key configured every request is admitted.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let headers = request.headers();
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .map(str::to_string);

    match provided {
        Some(key) if constant_time_compare(&key, &expected) => next.run(request).await,
        Some(_) => AppError::Unauthorized("Invalid API key".to_string()).into_response(),
        None => AppError::Unauthorized("Missing API key".to_string()).into_response(),
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
