use actix_web::{http::header::AUTHORIZATION, HttpRequest};
use log::{debug, trace, warn};
use opg_common::Secret;
use provider_tools::constant_time_eq;

use crate::errors::ServerError;

/// Checks that the request carries the administrative bearer token (`Authorization: Bearer <token>`).
///
/// If no admin token has been configured, every administrative request is refused.
pub fn require_admin(req: &HttpRequest, admin_token: &Secret<String>) -> Result<(), ServerError> {
    if !admin_token.is_set() {
        warn!("💻️ Administrative request to {} refused. OPG_ADMIN_TOKEN is not configured.", req.path());
        return Err(ServerError::Unauthorized("Administrative endpoints are disabled".into()));
    }
    let token = bearer_token(req).ok_or_else(|| {
        debug!("💻️ Administrative request to {} without a bearer token", req.path());
        ServerError::Unauthorized("Missing admin token".into())
    })?;
    if constant_time_eq(token.as_bytes(), admin_token.reveal().as_bytes()) {
        trace!("💻️ Admin token accepted");
        Ok(())
    } else {
        warn!("💻️ Administrative request to {} with an invalid token", req.path());
        Err(ServerError::Unauthorized("Invalid admin token".into()))
    }
}

/// The value of a `Bearer` authorization header, if there is one.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|t| !t.is_empty())
}

/// The value of `name` as a string, if the header is present and readable.
pub fn header_value<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
