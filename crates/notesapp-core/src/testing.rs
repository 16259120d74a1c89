//! In-process `BackendClient` used by the store tests.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::backend::{
    AuthChange, AuthEvent, BackendClient, BackendError, BackendResult, SignUpOptions,
};
use crate::models::{Note, NoteId, SessionUser};

#[derive(Default)]
struct FakeState {
    session: Option<SessionUser>,
    restorable: Option<SessionUser>,
    reject_auth: Option<String>,
    require_confirmation: bool,
    fail_sign_out: bool,
    hang_auth: bool,
    fail_table: bool,
    insert_delay: Option<Duration>,
    select_delay: Option<Duration>,
    rows: Vec<Note>,
    calls: Vec<String>,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
    events: broadcast::Sender<AuthChange>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(FakeState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reject_auth(&self, message: &str) {
        self.state().reject_auth = Some(message.to_string());
    }

    pub fn require_confirmation(&self) {
        self.state().require_confirmation = true;
    }

    pub fn fail_sign_out(&self) {
        self.state().fail_sign_out = true;
    }

    pub fn hang_auth(&self) {
        self.state().hang_auth = true;
    }

    pub fn fail_table(&self, failing: bool) {
        self.state().fail_table = failing;
    }

    /// Hold every `insert_note` for `delay` before it lands.
    pub fn delay_inserts(&self, delay: Duration) {
        self.state().insert_delay = Some(delay);
    }

    /// Hold every `select_notes` for `delay` after the rows are read.
    pub fn delay_selects(&self, delay: Duration) {
        self.state().select_delay = Some(delay);
    }

    pub fn set_restorable(&self, user: SessionUser) {
        self.state().restorable = Some(user);
    }

    pub fn seed_rows(&self, rows: Vec<Note>) {
        self.state().rows = rows;
    }

    pub fn rows(&self) -> Vec<Note> {
        self.state().rows.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Push a session change as if it came from the server.
    pub fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    fn record(&self, call: String) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    async fn auth_gate(&self) -> BackendResult<()> {
        let (hang, reject) = {
            let state = self.state();
            (state.hang_auth, state.reject_auth.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        match reject {
            Some(message) => Err(BackendError::AuthRejected(message)),
            None => Ok(()),
        }
    }

    fn table_gate(state: &FakeState) -> BackendResult<()> {
        if state.fail_table {
            Err(BackendError::Unavailable("table offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> BackendResult<SessionUser> {
        drop(self.record(format!("sign_in:{email}")));
        self.auth_gate().await?;
        let user = SessionUser::new(format!("remote-{email}"), email);
        self.state().session = Some(user.clone());
        self.emit(AuthChange::new(AuthEvent::SignedIn, Some(user.clone())));
        Ok(user)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        options: &SignUpOptions,
    ) -> BackendResult<Option<SessionUser>> {
        drop(self.record(format!(
            "sign_up:{email}:{}",
            options.email_redirect_to.as_deref().unwrap_or("")
        )));
        self.auth_gate().await?;
        if self.state().require_confirmation {
            return Ok(None);
        }
        let user = SessionUser::new(format!("remote-{email}"), email);
        self.state().session = Some(user.clone());
        self.emit(AuthChange::new(AuthEvent::SignedIn, Some(user.clone())));
        Ok(Some(user))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let fail = {
            let mut state = self.record("sign_out".to_string());
            state.session = None;
            state.fail_sign_out
        };
        if self.state().hang_auth {
            std::future::pending::<()>().await;
        }
        self.emit(AuthChange::new(AuthEvent::SignedOut, None));
        if fail {
            Err(BackendError::Api("logout failed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn restore_session(&self) -> BackendResult<Option<SessionUser>> {
        let mut state = self.record("restore_session".to_string());
        state.session = state.restorable.clone();
        Ok(state.session.clone())
    }

    fn subscribe_auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn select_notes(&self, user_id: &str) -> BackendResult<Vec<Note>> {
        let (rows, delay) = {
            let state = self.record(format!("select:{user_id}"));
            Self::table_gate(&state)?;
            let rows = state
                .rows
                .iter()
                .filter(|note| note.user_id.as_deref() == Some(user_id))
                .cloned()
                .collect::<Vec<_>>();
            (rows, state.select_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn insert_note(&self, note: &Note) -> BackendResult<()> {
        let delay = self.state().insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.record(format!("insert:{}", note.id));
        Self::table_gate(&state)?;
        state.rows.push(note.clone());
        Ok(())
    }

    async fn update_note(&self, note: &Note) -> BackendResult<()> {
        let mut state = self.record(format!("update:{}", note.id));
        Self::table_gate(&state)?;
        if let Some(row) = state.rows.iter_mut().find(|row| row.id == note.id) {
            *row = note.clone();
        }
        Ok(())
    }

    async fn delete_note(&self, user_id: &str, id: &NoteId) -> BackendResult<()> {
        let mut state = self.record(format!("delete:{id}"));
        Self::table_gate(&state)?;
        state
            .rows
            .retain(|row| !(row.id == *id && row.user_id.as_deref() == Some(user_id)));
        Ok(())
    }
}
