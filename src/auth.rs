use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::error::ApiError;
use crate::settings::Settings;

/// Checks the bearer header first and falls back to the `token` query parameter.
pub fn verify_token(
    settings: &Settings,
    auth: Option<&Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    match auth.map(|header| header.token()).or(query_token) {
        Some(token) if token == settings.auth_token => Ok(()),
        Some(_) => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
        None => Err(ApiError::Unauthorized(
            "Missing authentication token".into(),
        )),
    }
}
