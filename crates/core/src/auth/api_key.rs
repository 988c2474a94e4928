//! Shared-secret authentication for operators.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AuthError, AuthRequest, Authenticator, Identity};
use crate::config::AuthMethod;

/// Validates requests against the configured API key.
///
/// The key is accepted from `Authorization: Bearer <key>` or `X-API-Key`.
/// Only its SHA-256 digest is kept in memory.
pub struct ApiKeyAuthenticator {
    key_digest: [u8; 32],
    operator: String,
}

impl ApiKeyAuthenticator {
    /// `operator` is the user id given to authenticated requests.
    pub fn new(api_key: &str, operator: impl Into<String>) -> Self {
        Self {
            key_digest: digest(api_key),
            operator: operator.into(),
        }
    }

    fn extract_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(value) = request.header("authorization") {
            let (scheme, key) = value.split_once(' ')?;
            return scheme.eq_ignore_ascii_case("bearer").then_some(key.trim());
        }
        request.header("x-api-key").map(str::trim)
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

/// Compare fixed-length digests without early exit.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = self
            .extract_key(request)
            .ok_or(AuthError::MissingKey)?;

        if digests_match(&digest(provided), &self.key_digest) {
            Ok(Identity {
                user_id: self.operator.clone(),
                method: AuthMethod::ApiKey,
            })
        } else {
            Err(AuthError::Rejected(format!(
                "key does not match the one configured for {}",
                self.operator
            )))
        }
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::ApiKey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> AuthRequest {
        AuthRequest {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            source_ip: "127.0.0.1".parse().unwrap(),
        }
    }

    fn auth() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new("s3cret", "ops")
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let identity = auth()
            .authenticate(&request(&[("Authorization", "Bearer s3cret")]))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "ops");
        assert_eq!(identity.method, AuthMethod::ApiKey);

        let lower = auth()
            .authenticate(&request(&[("Authorization", "bearer s3cret")]))
            .await;
        assert!(lower.is_ok());
    }

    #[tokio::test]
    async fn test_x_api_key_header() {
        let identity = auth()
            .authenticate(&request(&[("X-API-Key", "s3cret")]))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "ops");
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let result = auth()
            .authenticate(&request(&[("X-API-Key", "guess")]))
            .await;
        match result {
            Err(AuthError::Rejected(reason)) => assert!(reason.contains("ops")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header() {
        let result = auth().authenticate(&request(&[])).await;
        assert!(matches!(result, Err(AuthError::MissingKey)));

        let result = auth()
            .authenticate(&request(&[("Authorization", "Basic s3cret")]))
            .await;
        assert!(matches!(result, Err(AuthError::MissingKey)));
    }

    #[test]
    fn test_digests_match() {
        assert!(digests_match(&digest("a"), &digest("a")));
        assert!(!digests_match(&digest("a"), &digest("b")));
    }
}
