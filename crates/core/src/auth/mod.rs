//! Request authentication for the sync bridge and job API.
//!
//! The remote agent and API callers share one secret. Requests without it
//! are rejected before any handler runs.

mod open;
mod shared_secret;
mod types;

pub use open::OpenAuthenticator;
pub use shared_secret::SharedSecretAuthenticator;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected in configuration.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(OpenAuthenticator)),
        AuthMethod::ApiKey => {
            let secret = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::ConfigurationError(
                        "auth.api_key must be set for the api_key method".to_string(),
                    )
                })?;
            Ok(Box::new(SharedSecretAuthenticator::new(&secret)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_open_authenticator() {
        let config = AuthConfig {
            method: AuthMethod::None,
            api_key: None,
        };
        let auth = create_authenticator(&config).unwrap();
        assert_eq!(auth.method_name(), "none");
    }

    #[test]
    fn test_create_shared_secret_authenticator() {
        let config = AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("agent-secret".to_string()),
        };
        let auth = create_authenticator(&config).unwrap();
        assert_eq!(auth.method_name(), "api_key");
    }

    #[test]
    fn test_empty_secret_is_a_configuration_error() {
        let config = AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some(String::new()),
        };
        assert!(matches!(
            create_authenticator(&config),
            Err(AuthError::ConfigurationError(_))
        ));
    }
}
