//! Session model

use serde::{Deserialize, Serialize};

/// The signed-in user. Either fully present or absent, never partial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
}

impl SessionUser {
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }

    /// Offline session keyed by the sign-in time
    #[must_use]
    pub fn local(email: impl Into<String>, timestamp_ms: i64) -> Self {
        Self::new(format!("local-{timestamp_ms}"), email)
    }
}
