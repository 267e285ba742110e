use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    AccountExists,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("identity token rejected: {0}")]
    InvalidToken(String),
    #[error("auth provider failure: {0}")]
    Provider(String),
}

impl AuthError {
    /// Stable machine-readable code, provider style.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "auth/invalid-credentials",
            AuthError::AccountExists => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::InvalidToken(_) => "auth/invalid-token",
            AuthError::Provider(_) => "auth/provider-failure",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no such task")]
    NotFound,
    #[error("storage write failed: {0}")]
    Backend(String),
}

/// A live query failed after it was established (permission revoked,
/// backend gone). Reported once per occurrence; recovery is a
/// deliberate re-subscription, never automatic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("subscription lost: {reason}")]
pub struct SubscriptionError {
    pub reason: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task title must not be empty")]
    EmptyTitle,
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Store(#[from] StoreError),
}
