//! Maps `AppError` onto the HTTP error shape from spec §6: `{"error":
//! "<message>", "code": "<symbolic>"}`, with the status codes from §7.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": self.public_message(),
            "code": self.code(),
        }));
        let mut response = (status, body).into_response();
        if let AppError::RateLimit { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
