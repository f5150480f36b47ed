//! Token verification seam.
//!
//! Token issuance lives outside this server. Connections and REST calls only
//! need "token in, user identity out", which is what `TokenVerifier` provides.

pub mod jwt;
pub mod middleware;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(String),
}

/// Turns a bearer token into the authenticated user identity.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, VerifyError>;
}
