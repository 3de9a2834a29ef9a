//! Application-handshake token validation.

use async_trait::async_trait;
use subtle::ConstantTimeEq;

/// Validates the token presented in an application handshake.
///
/// The server takes an injected authenticator so deployments can plug
/// in their own policy; the default is a shared cluster secret.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether `token` authorizes `node_id` to join the cluster.
    async fn authenticate(&self, node_id: &str, token: &str) -> bool;
}

/// Shared-secret authenticator with constant-time comparison.
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    /// Accept tokens equal to `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecretAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecretAuthenticator([REDACTED])")
    }
}

#[async_trait]
impl Authenticator for SharedSecretAuthenticator {
    async fn authenticate(&self, _node_id: &str, token: &str) -> bool {
        let expected = self.secret.as_bytes();
        let presented = token.as_bytes();
        expected.len() == presented.len() && bool::from(expected.ct_eq(presented))
    }
}
