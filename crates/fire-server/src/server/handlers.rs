//! The single request handler behind every path.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};

/// Body returned for every request: three U+1F525 FIRE characters.
pub const FIRE_BODY: &str = "\u{1F525}\u{1F525}\u{1F525}";

/// `Content-Type` of every response.
pub const CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Any method, any path: `200 OK` with [`FIRE_BODY`].
pub async fn fire() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        FIRE_BODY,
    )
}
