//! Session token verification seam.

use async_trait::async_trait;

use super::model::SessionClaims;

/// Verifies a signed session token and yields its claims.
///
/// Implementations own the signing secret.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<SessionClaims, String>;
}
