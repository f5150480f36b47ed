use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use super::TokenVerifier;

/// Authenticated caller of a REST endpoint, from `Authorization: Bearer <jwt>`.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Set by the inject_verifier middleware layer
        let verifier = parts
            .extensions
            .get::<Verifier>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let user_id = verifier
            .0
            .verify(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser { user_id })
    }
}

/// Token verifier stored in request extensions for the AuthUser extractor
#[derive(Clone)]
pub struct Verifier(pub Arc<dyn TokenVerifier>);
