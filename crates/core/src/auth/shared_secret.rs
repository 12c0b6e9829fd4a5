use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AuthError, AuthRequest, Authenticator, Caller};

/// Validates a shared secret sent as `X-API-Key: <secret>` or
/// `Authorization: Bearer <secret>`.
///
/// Only the SHA-256 digest of the secret is kept; candidates are hashed and
/// compared in constant time so neither length nor prefix leaks.
pub struct SharedSecretAuthenticator {
    digest: [u8; 32],
}

impl SharedSecretAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    fn presented_secret(request: &AuthRequest) -> Option<&str> {
        if let Some(key) = request.header("x-api-key") {
            return Some(key.trim());
        }
        let auth = request.header("authorization")?;
        let (scheme, token) = auth.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then_some(token.trim())
    }

    fn matches(&self, candidate: &str) -> bool {
        let candidate: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        candidate
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[async_trait]
impl Authenticator for SharedSecretAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Caller, AuthError> {
        let secret = Self::presented_secret(request).ok_or(AuthError::NotAuthenticated)?;

        if self.matches(secret) {
            Ok(Caller {
                principal: "sync_agent".to_string(),
                method: "api_key",
            })
        } else {
            Err(AuthError::InvalidCredentials("invalid API key".to_string()))
        }
    }

    fn method_name(&self) -> &'static str {
        "api_key"
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
        }
    }

    #[tokio::test]
    async fn test_x_api_key_accepted() {
        let auth = SharedSecretAuthenticator::new("agent-secret");
        let caller = auth
            .authenticate(&request(&[("X-API-Key", "agent-secret")]))
            .await
            .unwrap();
        assert_eq!(caller.method, "api_key");
    }

    #[tokio::test]
    async fn test_bearer_token_accepted_case_insensitively() {
        let auth = SharedSecretAuthenticator::new("agent-secret");
        for header in ["Bearer agent-secret", "bearer agent-secret"] {
            assert!(auth
                .authenticate(&request(&[("Authorization", header)]))
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let auth = SharedSecretAuthenticator::new("agent-secret");
        let result = auth
            .authenticate(&request(&[("X-API-Key", "agent-secre")]))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_missing_secret_is_unauthenticated() {
        let auth = SharedSecretAuthenticator::new("agent-secret");
        let result = auth
            .authenticate(&request(&[("Authorization", "Basic abc")]))
            .await;
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }
}
