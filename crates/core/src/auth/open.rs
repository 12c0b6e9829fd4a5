use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Caller};

/// Accepts every request. Only used when `auth.method = "none"` is set
/// explicitly.
pub struct OpenAuthenticator;

#[async_trait]
impl Authenticator for OpenAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Caller, AuthError> {
        Ok(Caller::anonymous())
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}
