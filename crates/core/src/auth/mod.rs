//! Authentication for the control API.

mod api_key;
mod none;
mod traits;
mod types;

pub use api_key::ApiKeyAuthenticator;
pub use none::OpenAuthenticator;
pub use traits::{AuthError, Authenticator};
pub use types::{AuthRequest, Identity, UNAUTHENTICATED_OPERATOR};

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected in `[auth]`.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(OpenAuthenticator)),
        AuthMethod::ApiKey => {
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::Misconfigured(
                        "api_key must be set when using the api_key method".to_string(),
                    )
                })?;
            Ok(Box::new(ApiKeyAuthenticator::new(api_key, config.operator.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(method: AuthMethod, api_key: Option<&str>) -> AuthConfig {
        AuthConfig {
            method,
            api_key: api_key.map(String::from),
            operator: "operator".to_string(),
        }
    }

    #[test]
    fn test_create_authenticator() {
        let none = create_authenticator(&config(AuthMethod::None, None)).unwrap();
        assert_eq!(none.method(), AuthMethod::None);

        let key = create_authenticator(&config(AuthMethod::ApiKey, Some("k"))).unwrap();
        assert_eq!(key.method(), AuthMethod::ApiKey);
    }

    #[test]
    fn test_api_key_method_needs_key() {
        for missing in [None, Some("")] {
            let result = create_authenticator(&config(AuthMethod::ApiKey, missing));
            assert!(matches!(result, Err(AuthError::Misconfigured(_))));
        }
    }
}
