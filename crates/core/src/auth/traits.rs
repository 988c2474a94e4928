use async_trait::async_trait;
use thiserror::Error;

use super::types::{AuthRequest, Identity};
use crate::config::AuthMethod;

/// Why an operator request was turned away.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No API key in `Authorization` or `X-API-Key`.
    #[error("operator API key required")]
    MissingKey,

    #[error("operator API key rejected: {0}")]
    Rejected(String),

    /// `[auth]` cannot produce an authenticator.
    #[error("auth section invalid: {0}")]
    Misconfigured(String),
}

impl AuthError {
    /// Label for the auth failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingKey => "missing_key",
            AuthError::Rejected(_) => "rejected",
            AuthError::Misconfigured(_) => "misconfigured",
        }
    }
}

/// Decides which operator, if any, is driving a control API request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    fn method(&self) -> AuthMethod;
}
