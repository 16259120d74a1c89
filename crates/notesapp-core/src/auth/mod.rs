//! Auth Store: the current user session.
//!
//! Local actions lead: `sign_in`, `sign_up` and `sign_out` commit their result
//! to the store before returning. When a backend is present, `mount` also
//! follows the backend's own session changes and reconciles them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::{AuthChange, BackendAccessor, BackendError, BackendResult, SignUpOptions};
use crate::config::AppConfig;
use crate::models::SessionUser;
use crate::state::{AuthState, AuthStatus};
use crate::storage::PersistentStore;
use crate::util::now_millis;

/// Storage key of the persisted session.
pub const AUTH_USER_KEY: &str = "auth:user";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email and password are required")]
    InvalidCredentialsInput,
    #[error("{0}")]
    RemoteAuthRejected(String),
    #[error("Auth request failed: {0}")]
    Remote(String),
    #[error("Auth request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<BackendError> for AuthError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::AuthRejected(message) => Self::RemoteAuthRejected(message),
            other => Self::Remote(other.to_string()),
        }
    }
}

/// Result of a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(SessionUser),
    /// The account exists but must be confirmed by email first.
    ConfirmationRequired,
}

impl SignUpOutcome {
    #[must_use]
    pub const fn user(&self) -> Option<&SessionUser> {
        match self {
            Self::SignedIn(user) => Some(user),
            Self::ConfirmationRequired => None,
        }
    }
}

struct AuthInner {
    storage: PersistentStore,
    backend: BackendAccessor,
    state: watch::Sender<AuthState>,
    actions: tokio::sync::Mutex<()>,
    timeout: Duration,
    site_url: String,
    listener: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Drop for AuthInner {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

/// Cheap-to-clone handle to the session state.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<AuthInner>,
}

impl AuthStore {
    /// Create the store, restoring the persisted session from `storage`.
    pub fn new(storage: PersistentStore, backend: BackendAccessor, config: &AppConfig) -> Self {
        let user = storage.get::<Option<SessionUser>>(AUTH_USER_KEY, None);
        let (state, _) = watch::channel(AuthState {
            user,
            loading: false,
        });

        Self {
            inner: Arc::new(AuthInner {
                storage,
                backend,
                state,
                actions: tokio::sync::Mutex::new(()),
                timeout: config.auth_timeout(),
                site_url: config.site_url(),
                listener: Mutex::new(None),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.inner.state.borrow().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.state.borrow().status()
    }

    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Receive every later state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AuthError> {
        let _action = self.inner.actions.lock().await;
        let _loading = Loading::start(&self.inner.state);

        let user = if let Some(client) = self.inner.backend.get_client() {
            self.bounded(client.sign_in_with_password(email, password))
                .await?
        } else {
            require_credentials(email, password)?;
            SessionUser::local(email.trim(), now_millis())
        };

        tracing::info!("Signed in as {}", user.email);
        self.commit(Some(user.clone()));
        Ok(user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let _action = self.inner.actions.lock().await;
        let _loading = Loading::start(&self.inner.state);

        let Some(client) = self.inner.backend.get_client() else {
            require_credentials(email, password)?;
            let user = SessionUser::local(email.trim(), now_millis());
            self.commit(Some(user.clone()));
            return Ok(SignUpOutcome::SignedIn(user));
        };

        let options = SignUpOptions {
            email_redirect_to: Some(self.inner.site_url.clone()),
        };
        match self.bounded(client.sign_up(email, password, &options)).await? {
            Some(user) => {
                tracing::info!("Signed up as {}", user.email);
                self.commit(Some(user.clone()));
                Ok(SignUpOutcome::SignedIn(user))
            }
            None => {
                tracing::info!("Sign-up for {} awaits email confirmation", email);
                Ok(SignUpOutcome::ConfirmationRequired)
            }
        }
    }

    /// Always ends signed out locally. A remote failure is still returned.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _action = self.inner.actions.lock().await;
        if self.user().is_none() {
            return Ok(());
        }
        let _loading = Loading::start(&self.inner.state);

        let remote = match self.inner.backend.get_client() {
            Some(client) => self.bounded(client.sign_out()).await,
            None => Ok(()),
        };
        if let Err(error) = &remote {
            tracing::warn!("Remote sign-out failed, clearing local session anyway: {}", error);
        }

        self.commit(None);
        remote
    }

    /// Adopt the backend's session and follow its later changes.
    ///
    /// Without a backend this does nothing and the persisted session stands.
    pub async fn mount(&self) {
        self.inner.torn_down.store(false, Ordering::SeqCst);
        let Some(client) = self.inner.backend.get_client() else {
            return;
        };

        let changes = client.subscribe_auth_changes();
        {
            let _action = self.inner.actions.lock().await;
            match self.bounded(client.restore_session()).await {
                Ok(Some(user)) => {
                    tracing::debug!("Restored backend session for {}", user.email);
                    self.commit(Some(user));
                }
                Ok(None) => {
                    if self.user().is_some() {
                        tracing::info!("Backend has no session; clearing stale local session");
                    }
                    self.commit(None);
                }
                Err(error) => {
                    tracing::warn!("Could not restore backend session, keeping local state: {}", error);
                }
            }
        }

        let listener = tokio::spawn(follow_changes(Arc::downgrade(&self.inner), changes));
        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(listener);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop following backend session changes.
    pub fn unmount(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        if let Some(listener) = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = BackendResult<T>> + Send,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.inner.timeout, call).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => {
                tracing::warn!("Auth request timed out after {:?}", self.inner.timeout);
                Err(AuthError::Timeout(self.inner.timeout))
            }
        }
    }

    fn commit(&self, user: Option<SessionUser>) {
        self.inner.commit(user);
    }
}

impl AuthInner {
    fn commit(&self, user: Option<SessionUser>) {
        match &user {
            Some(user) => self.storage.set(AUTH_USER_KEY, user),
            None => self.storage.remove(AUTH_USER_KEY),
        }
        self.state.send_if_modified(|state| {
            if state.user == user {
                false
            } else {
                state.user = user;
                true
            }
        });
    }
}

async fn follow_changes(inner: Weak<AuthInner>, mut changes: broadcast::Receiver<AuthChange>) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Auth listener skipped {} stale session events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.torn_down.load(Ordering::SeqCst) {
            break;
        }
        tracing::debug!("Backend session event: {:?}", change.event);
        inner.commit(change.user);
    }
}

/// Marks the store as loading until dropped, including on cancellation.
struct Loading<'a> {
    state: &'a watch::Sender<AuthState>,
}

impl<'a> Loading<'a> {
    fn start(state: &'a watch::Sender<AuthState>) -> Self {
        state.send_modify(|state| state.loading = true);
        Self { state }
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.loading = false);
    }
}

fn require_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::InvalidCredentialsInput);
    }
    Ok(())
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthStore")
            .field("state", &*self.inner.state.borrow())
            .field("backend", &self.inner.backend)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthEvent, BackendClient};
    use crate::storage::MemoryStorage;
    use crate::testing::FakeBackend;
    use pretty_assertions::assert_eq;

    fn offline_store() -> (AuthStore, Arc<MemoryStorage>) {
        let memory = Arc::new(MemoryStorage::default());
        let storage = PersistentStore::new(memory.clone());
        let store = AuthStore::new(storage, BackendAccessor::offline(), &AppConfig::default());
        (store, memory)
    }

    fn remote_store(fake: &Arc<FakeBackend>) -> (AuthStore, Arc<MemoryStorage>) {
        let memory = Arc::new(MemoryStorage::default());
        let storage = PersistentStore::new(memory.clone());
        let backend = BackendAccessor::with_client(fake.clone() as Arc<dyn BackendClient>);
        let store = AuthStore::new(storage, backend, &AppConfig::default());
        (store, memory)
    }

    const USER_KEY: &str = "notesapp_v1:auth:user";

    #[tokio::test]
    async fn offline_sign_in_rejects_blank_credentials() {
        let (store, memory) = offline_store();

        let error = store.sign_in("", "").await.unwrap_err();
        assert_eq!(error, AuthError::InvalidCredentialsInput);
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert!(memory.raw(USER_KEY).is_none());

        let error = store.sign_in("u@e.com", "").await.unwrap_err();
        assert_eq!(error, AuthError::InvalidCredentialsInput);
        let error = store.sign_up("   ", "pw").await.unwrap_err();
        assert_eq!(error, AuthError::InvalidCredentialsInput);
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn offline_sign_in_then_sign_out() {
        let (store, memory) = offline_store();

        let user = store.sign_in("u@e.com", "pw").await.unwrap();
        assert_eq!(user.email, "u@e.com");
        assert!(user.id.starts_with("local-"));
        assert_eq!(store.status(), AuthStatus::Authenticated);
        assert!(!store.loading());

        let persisted: SessionUser =
            serde_json::from_str(&memory.raw(USER_KEY).unwrap()).unwrap();
        assert_eq!(persisted, user);

        store.sign_out().await.unwrap();
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert!(memory.raw(USER_KEY).is_none());
    }

    #[tokio::test]
    async fn offline_sign_up_signs_in_immediately() {
        let (store, _) = offline_store();

        let outcome = store.sign_up("new@e.com", "pw").await.unwrap();
        assert_eq!(outcome.user().map(|user| user.email.as_str()), Some("new@e.com"));
        assert_eq!(store.status(), AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn sign_out_when_anonymous_is_a_quiet_no_op() {
        let fake = Arc::new(FakeBackend::new());
        let (store, _) = remote_store(&fake);

        store.sign_out().await.unwrap();
        assert!(fake.calls().is_empty());
        assert_eq!(store.status(), AuthStatus::Anonymous);
    }

    #[tokio::test]
    async fn persisted_session_is_restored_at_creation() {
        let memory = Arc::new(MemoryStorage::default());
        let storage = PersistentStore::new(memory.clone());
        storage.set(AUTH_USER_KEY, &SessionUser::new("local-1", "a@e.com"));

        let store = AuthStore::new(storage, BackendAccessor::offline(), &AppConfig::default());
        assert_eq!(store.user(), Some(SessionUser::new("local-1", "a@e.com")));
    }

    #[tokio::test]
    async fn corrupt_persisted_session_reads_as_anonymous() {
        let memory = Arc::new(MemoryStorage::default());
        let storage = PersistentStore::new(memory.clone());
        storage.set(AUTH_USER_KEY, &serde_json::json!({ "id": 7 }));

        let store = AuthStore::new(storage, BackendAccessor::offline(), &AppConfig::default());
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn remote_sign_in_delegates_validation_to_backend() {
        let fake = Arc::new(FakeBackend::new());
        let (store, _) = remote_store(&fake);

        let user = store.sign_in("", "").await.unwrap();
        assert_eq!(user.id, "remote-");
        assert_eq!(fake.calls(), vec!["sign_in:".to_string()]);
    }

    #[tokio::test]
    async fn remote_rejection_surfaces_backend_message() {
        let fake = Arc::new(FakeBackend::new());
        fake.reject_auth("Invalid login credentials");
        let (store, memory) = remote_store(&fake);

        let error = store.sign_in("u@e.com", "bad").await.unwrap_err();
        assert_eq!(
            error,
            AuthError::RemoteAuthRejected("Invalid login credentials".to_string())
        );
        assert_eq!(error.to_string(), "Invalid login credentials");
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert!(memory.raw(USER_KEY).is_none());
    }

    #[tokio::test]
    async fn remote_sign_up_passes_redirect_and_handles_confirmation() {
        let fake = Arc::new(FakeBackend::new());
        fake.require_confirmation();
        let (store, _) = remote_store(&fake);

        let outcome = store.sign_up("new@e.com", "pw").await.unwrap();
        assert_eq!(outcome, SignUpOutcome::ConfirmationRequired);
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert_eq!(
            fake.calls(),
            vec!["sign_up:new@e.com:http://localhost:3000/".to_string()]
        );
    }

    #[tokio::test]
    async fn remote_sign_out_failure_still_clears_session() {
        let fake = Arc::new(FakeBackend::new());
        fake.fail_sign_out();
        let (store, memory) = remote_store(&fake);
        store.sign_in("u@e.com", "pw").await.unwrap();

        let error = store.sign_out().await.unwrap_err();
        assert!(matches!(error, AuthError::Remote(_)));
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert!(memory.raw(USER_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_backend_times_out_and_leaves_authenticating() {
        let fake = Arc::new(FakeBackend::new());
        fake.hang_auth();
        let (store, _) = remote_store(&fake);

        let action = tokio::spawn({
            let store = store.clone();
            async move { store.sign_in("u@e.com", "pw").await }
        });
        tokio::task::yield_now().await;
        assert!(store.loading());
        assert_eq!(store.status(), AuthStatus::Authenticating);

        let error = action.await.unwrap().unwrap_err();
        assert_eq!(error, AuthError::Timeout(Duration::from_secs(15)));
        assert_eq!(store.status(), AuthStatus::Anonymous);
        assert!(!store.loading());
    }

    #[tokio::test]
    async fn mount_adopts_backend_session() {
        let fake = Arc::new(FakeBackend::new());
        fake.set_restorable(SessionUser::new("remote-1", "r@e.com"));
        let (store, memory) = remote_store(&fake);

        store.mount().await;
        assert_eq!(store.user(), Some(SessionUser::new("remote-1", "r@e.com")));
        assert!(memory.raw(USER_KEY).is_some());
        store.unmount();
    }

    #[tokio::test]
    async fn mount_clears_stale_local_session() {
        let fake = Arc::new(FakeBackend::new());
        let memory = Arc::new(MemoryStorage::default());
        let storage = PersistentStore::new(memory.clone());
        storage.set(AUTH_USER_KEY, &SessionUser::new("local-1", "a@e.com"));
        let backend = BackendAccessor::with_client(fake.clone() as Arc<dyn BackendClient>);
        let store = AuthStore::new(storage, backend, &AppConfig::default());

        store.mount().await;
        assert!(store.user().is_none());
        assert!(memory.raw(USER_KEY).is_none());
    }

    #[tokio::test]
    async fn remote_session_changes_are_followed_until_unmount() {
        let fake = Arc::new(FakeBackend::new());
        let (store, _) = remote_store(&fake);
        store.mount().await;
        let mut updates = store.subscribe();

        let user = SessionUser::new("remote-9", "nine@e.com");
        fake.emit(AuthChange::new(AuthEvent::SignedIn, Some(user.clone())));
        updates.changed().await.unwrap();
        assert_eq!(store.user(), Some(user.clone()));

        fake.emit(AuthChange::new(AuthEvent::SignedOut, None));
        updates.changed().await.unwrap();
        assert!(store.user().is_none());

        store.unmount();
        fake.emit(AuthChange::new(AuthEvent::SignedIn, Some(user)));
        tokio::task::yield_now().await;
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn mount_without_backend_keeps_local_session() {
        let (store, _) = offline_store();
        store.sign_in("u@e.com", "pw").await.unwrap();

        store.mount().await;
        assert_eq!(store.status(), AuthStatus::Authenticated);
    }
}
