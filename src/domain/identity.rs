use serde::{Deserialize, Serialize};

/// Authenticated user handle as issued by the identity provider. The
/// application never mints one; it only observes transitions between
/// `None` and `Some`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}
