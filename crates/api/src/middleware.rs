use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use songforge_core::UserId;

use crate::app::errors::json_error;
use crate::context::UserContext;

/// Header set by the upstream auth collaborator.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub async fn user_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", message),
    };

    req.extensions_mut().insert(UserContext::new(user_id));
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers.get(USER_ID_HEADER).ok_or("missing x-user-id header")?;
    let header = header.to_str().map_err(|_| "malformed x-user-id header")?;
    header.parse::<UserId>().map_err(|_| "x-user-id must be a uuid")
}

/// Constant-time comparison of the presented admin token.
pub fn admin_token_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let (Some(expected), Some(presented)) = (
        expected,
        headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()),
    ) else {
        return false;
    };
    let (a, b) = (expected.as_bytes(), presented.trim().as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
