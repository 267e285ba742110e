use async_trait::async_trait;
use tokio::sync::watch;

use super::error::AuthError;
use super::identity::Identity;

/// Identity-provider boundary.
///
/// Implementations own the auth state and publish exactly one new value
/// per transition. A fresh receiver sees the present state immediately
/// via `borrow`; sign-in and sign-out report success or failure here,
/// while the resulting state change arrives through the watch channel.
#[async_trait]
pub trait AuthGateway: Send + Sync + 'static {
    fn watch(&self) -> watch::Receiver<Option<Identity>>;

    /// Creates the account and leaves it signed in, provider semantics.
    async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<(), AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError>;

    /// Signs in with an identity token issued by an external OAuth
    /// provider; provisions the account on first sight.
    async fn sign_in_with_token(&self, id_token: &str) -> Result<(), AuthError>;

    /// Idempotent.
    async fn sign_out(&self) -> Result<(), AuthError>;
}
