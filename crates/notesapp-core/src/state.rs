//! Shared state types published by the stores.

use crate::models::SessionUser;

/// Where the auth state machine currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Snapshot of the Auth Store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<SessionUser>,
    /// An auth action is in flight.
    pub loading: bool,
}

impl AuthState {
    #[must_use]
    pub const fn status(&self) -> AuthStatus {
        if self.loading {
            AuthStatus::Authenticating
        } else if self.user.is_some() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Anonymous
        }
    }
}

/// Result of loading the canonical collection from the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteSync {
    /// No backend or no session; local notes untouched.
    Skipped,
    /// Local notes replaced by this many remote notes.
    Replaced(usize),
    /// Remote load failed; local notes untouched.
    Failed(String),
}
