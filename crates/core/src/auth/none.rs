use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};
use crate::config::AuthMethod;

/// Open control API: every caller acts as the unauthenticated operator.
/// Selected only by `[auth] method = "none"`.
#[derive(Debug, Default)]
pub struct OpenAuthenticator;

#[async_trait]
impl Authenticator for OpenAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity::unauthenticated())
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::None
    }
}
