//! Remote backend capability.
//!
//! Stores never talk to the network directly. They ask a `BackendAccessor`
//! for a `BackendClient`; `None` means "offline mode" and is a normal outcome.

mod accessor;
#[cfg(feature = "supabase")]
mod supabase;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Note, NoteId, SessionUser};

pub use accessor::{BackendAccessor, BackendFactory};
#[cfg(feature = "supabase")]
pub use supabase::{
    normalize_auth_url, AuthSession, SessionPersistence, StoredSession, SupabaseBackend,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Remote backend is not configured")]
    NotConfigured,
    #[error("Remote backend is unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid backend configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[cfg(feature = "supabase")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The backend refused the credentials or the auth request.
    #[error("{0}")]
    AuthRejected(String),
    #[error("Backend API error: {0}")]
    Api(String),
    #[error("No active backend session")]
    NoSession,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Options forwarded with a sign-up request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignUpOptions {
    /// Where the confirmation email should send the user back to.
    pub email_redirect_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    SessionRestored,
}

/// Session change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub user: Option<SessionUser>,
}

impl AuthChange {
    #[must_use]
    pub const fn new(event: AuthEvent, user: Option<SessionUser>) -> Self {
        Self { event, user }
    }
}

/// Everything the stores need from a remote backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<SessionUser>;

    /// `Ok(None)` when the account must be confirmed before a session exists.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &SignUpOptions,
    ) -> BackendResult<Option<SessionUser>>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Resume a previously persisted backend session, if one is still valid.
    async fn restore_session(&self) -> BackendResult<Option<SessionUser>>;

    /// Stream of session changes. Dropping the receiver unsubscribes.
    fn subscribe_auth_changes(&self) -> broadcast::Receiver<AuthChange>;

    async fn select_notes(&self, user_id: &str) -> BackendResult<Vec<Note>>;

    async fn insert_note(&self, note: &Note) -> BackendResult<()>;

    async fn update_note(&self, note: &Note) -> BackendResult<()>;

    async fn delete_note(&self, user_id: &str, id: &NoteId) -> BackendResult<()>;
}
