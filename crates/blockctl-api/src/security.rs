//! Caller identity and response hardening.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the auth layer has set `X-User-Id`, `X-Project-Id` and `X-Roles`.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use blockctl_core::{ApiError, RequestContext};

/// Header carrying the calling user.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's project.
pub const PROJECT_ID_HEADER: &str = "x-project-id";
/// Comma-separated role names.
pub const ROLES_HEADER: &str = "x-roles";

const ADMIN_ROLE: &str = "admin";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| ApiError::InvalidInput(format!("{} header is not valid text", name))),
        None => Ok(None),
    }
}

/// Build the request context from identity headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let project_id = header_str(headers, PROJECT_ID_HEADER)?
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Forbidden("request carries no project identity".to_string()))?;
    let user_id = header_str(headers, USER_ID_HEADER)?.unwrap_or_default();
    let is_admin = header_str(headers, ROLES_HEADER)?
        .map(|roles| roles.split(',').any(|r| r.trim().eq_ignore_ascii_case(ADMIN_ROLE)))
        .unwrap_or(false);

    Ok(RequestContext {
        user_id: user_id.to_string(),
        project_id: project_id.to_string(),
        is_admin,
    })
}

/// Adds `nosniff` and `no-store` to every response.
pub async fn security_headers_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    response
}
