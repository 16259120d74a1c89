//! Supabase implementation of `BackendClient`.
//!
//! Auth goes through the GoTrue REST endpoints under `/auth/v1`, notes through
//! the PostgREST `notes` table under `/rest/v1`. Row-level security on the
//! table is expected to scope rows to the bearer's user; requests still filter
//! by `user_id` explicitly.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{
    AuthChange, AuthEvent, BackendClient, BackendError, BackendResult, SignUpOptions,
};
use crate::config::BackendConfig;
use crate::models::{Note, NoteId, SessionUser};
use crate::storage::PersistentStore;
use crate::util::{compact_text, is_http_url, now_millis, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;
const AUTH_EVENT_CAPACITY: usize = 16;
const NOTES_TABLE: &str = "notes";
const BACKEND_SESSION_KEY: &str = "auth:backend_session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }

    fn session_user(&self, fallback_email: &str) -> SessionUser {
        SessionUser::new(
            self.user.id.clone(),
            self.user
                .email
                .clone()
                .filter(|email| !email.is_empty())
                .unwrap_or_else(|| fallback_email.to_string()),
        )
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Durable home for backend tokens between runs.
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> BackendResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> BackendResult<()>;
    fn clear_session(&self) -> BackendResult<()>;
}

/// Session persistence on top of the application key-value store.
#[derive(Debug, Clone)]
pub struct StoredSession {
    store: PersistentStore,
}

impl StoredSession {
    pub const fn new(store: PersistentStore) -> Self {
        Self { store }
    }
}

impl SessionPersistence for StoredSession {
    fn load_session(&self) -> BackendResult<Option<AuthSession>> {
        Ok(self.store.get(BACKEND_SESSION_KEY, None))
    }

    fn save_session(&self, session: &AuthSession) -> BackendResult<()> {
        self.store.set(BACKEND_SESSION_KEY, session);
        Ok(())
    }

    fn clear_session(&self) -> BackendResult<()> {
        self.store.remove(BACKEND_SESSION_KEY);
        Ok(())
    }
}

pub struct SupabaseBackend<S: SessionPersistence> {
    auth_url: String,
    rest_url: String,
    anon_key: String,
    site_url: String,
    client: Client,
    store: S,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthChange>,
}

impl<S: SessionPersistence> SupabaseBackend<S> {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        site_url: impl Into<String>,
        store: S,
    ) -> BackendResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let rest_url = format!("{}/rest/v1", project_url(&auth_url));
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(BackendError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            auth_url,
            rest_url,
            anon_key,
            site_url: site_url.into(),
            client: Client::builder().build()?,
            store,
            session: RwLock::new(None),
            events,
        })
    }

    pub fn from_config(config: &BackendConfig, store: S) -> BackendResult<Self> {
        Self::new(&config.url, &config.anon_key, &config.site_url, store)
    }

    fn current_session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn adopt_session(&self, session: &AuthSession) -> BackendResult<()> {
        self.store.save_session(session)?;
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn drop_session(&self) -> BackendResult<()> {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.store.clear_session()
    }

    fn emit(&self, event: AuthEvent, user: Option<SessionUser>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthChange::new(event, user));
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(BackendError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        let response = self.send_auth_request(request).await?;
        let session = response.into_session()?.ok_or_else(|| {
            BackendError::AuthRejected(
                "Refresh response did not include an active session".to_string(),
            )
        })?;

        self.adopt_session(&session)?;
        Ok(session)
    }

    /// Session with a usable access token, refreshed when close to expiry.
    async fn active_session(&self) -> BackendResult<AuthSession> {
        let session = self.current_session().ok_or(BackendError::NoSession)?;
        if !session.is_expired() {
            return Ok(session);
        }

        let refreshed = self.refresh_session(&session.refresh_token).await?;
        self.emit(
            AuthEvent::TokenRefreshed,
            Some(refreshed.session_user("")),
        );
        Ok(refreshed)
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    fn table_request(&self, request: RequestBuilder, session: &AuthSession) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
    }

    fn table_url(&self) -> String {
        format!("{}/{NOTES_TABLE}", self.rest_url)
    }

    async fn send_auth_request(
        &self,
        request: RequestBuilder,
    ) -> BackendResult<SupabaseAuthResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::AuthRejected(parse_api_error(status, &body)));
        }
        Ok(response.json::<SupabaseAuthResponse>().await?)
    }

    async fn send_table_request(&self, request: RequestBuilder) -> BackendResult<reqwest::Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(parse_api_error(status, &body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl<S: SessionPersistence> BackendClient for SupabaseBackend<S> {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<SessionUser> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );

        let response = self.send_auth_request(request).await?;
        let session = response.into_session()?.ok_or_else(|| {
            BackendError::AuthRejected(
                "Sign-in response did not include an active session".to_string(),
            )
        })?;

        self.adopt_session(&session)?;
        let user = session.session_user(email);
        self.emit(AuthEvent::SignedIn, Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &SignUpOptions,
    ) -> BackendResult<Option<SessionUser>> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let redirect_to = options
            .email_redirect_to
            .clone()
            .unwrap_or_else(|| self.site_url.clone());
        let request = self.public_request(
            self.client
                .post(format!("{}/signup", self.auth_url))
                .query(&[("redirect_to", redirect_to.as_str())])
                .json(&payload),
        );

        let response = self.send_auth_request(request).await?;
        match response.into_session()? {
            Some(session) => {
                self.adopt_session(&session)?;
                let user = session.session_user(email);
                self.emit(AuthEvent::SignedIn, Some(user.clone()));
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(session) = self.current_session() else {
            self.drop_session()?;
            return Ok(());
        };

        let request = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token);

        // Local tokens are discarded even when the server call fails.
        let outcome = match request.send().await {
            Ok(response)
                if response.status().is_success()
                    || response.status() == StatusCode::UNAUTHORIZED =>
            {
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Api(parse_api_error(status, &body)))
            }
            Err(error) => Err(BackendError::Http(error)),
        };

        self.drop_session()?;
        self.emit(AuthEvent::SignedOut, None);
        outcome
    }

    async fn restore_session(&self) -> BackendResult<Option<SessionUser>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            *self.session.write().unwrap_or_else(PoisonError::into_inner) =
                Some(stored_session.clone());
            let user = stored_session.session_user("");
            self.emit(AuthEvent::SessionRestored, Some(user.clone()));
            return Ok(Some(user));
        }

        match self.refresh_session(&stored_session.refresh_token).await {
            Ok(refreshed) => {
                let user = refreshed.session_user("");
                self.emit(AuthEvent::TokenRefreshed, Some(user.clone()));
                Ok(Some(user))
            }
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.drop_session()?;
                Ok(None)
            }
        }
    }

    fn subscribe_auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn select_notes(&self, user_id: &str) -> BackendResult<Vec<Note>> {
        let session = self.active_session().await?;
        let request = self.table_request(
            self.client
                .get(self.table_url())
                .query(&[
                    ("select", "*".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                    ("order", "updated_at.desc".to_string()),
                ])
                .header("Accept", "application/json"),
            &session,
        );
        let rows = self
            .send_table_request(request)
            .await?
            .json::<Vec<NoteRow>>()
            .await?;
        Ok(rows.into_iter().map(NoteRow::into_note).collect())
    }

    async fn insert_note(&self, note: &Note) -> BackendResult<()> {
        let session = self.active_session().await?;
        let request = self.table_request(
            self.client
                .post(self.table_url())
                .header("Prefer", "return=minimal")
                .json(&NoteRow::from_note(note)),
            &session,
        );
        self.send_table_request(request).await?;
        Ok(())
    }

    async fn update_note(&self, note: &Note) -> BackendResult<()> {
        let session = self.active_session().await?;
        let payload = serde_json::json!({
            "title": note.title,
            "content": note.content,
            "updated_at": millis_to_rfc3339(note.updated_at),
        });
        let request = self.table_request(
            self.client
                .patch(self.table_url())
                .query(&[("id", format!("eq.{}", note.id))])
                .header("Prefer", "return=minimal")
                .json(&payload),
            &session,
        );
        self.send_table_request(request).await?;
        Ok(())
    }

    async fn delete_note(&self, user_id: &str, id: &NoteId) -> BackendResult<()> {
        let session = self.active_session().await?;
        let request = self.table_request(
            self.client.delete(self.table_url()).query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{user_id}")),
            ]),
            &session,
        );
        self.send_table_request(request).await?;
        Ok(())
    }
}

pub fn normalize_auth_url(url: &str) -> BackendResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(BackendError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !is_http_url(trimmed) {
        return Err(BackendError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

fn project_url(auth_url: &str) -> &str {
    auth_url.strip_suffix("/auth/v1").unwrap_or(auth_url)
}

fn millis_to_rfc3339(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|date_time| date_time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn rfc3339_to_millis(value: Option<&str>) -> Option<i64> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|date_time| date_time.timestamp_millis())
}

/// Row shape of the `notes` table.
#[derive(Debug, Serialize, Deserialize)]
struct NoteRow {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl NoteRow {
    fn from_note(note: &Note) -> Self {
        Self {
            id: note.id.to_string(),
            title: Some(note.title.clone()),
            content: Some(note.content.clone()),
            created_at: millis_to_rfc3339(note.created_at),
            updated_at: millis_to_rfc3339(note.updated_at),
            user_id: note.user_id.clone(),
        }
    }

    fn into_note(self) -> Note {
        let now = now_millis();
        let created_at = rfc3339_to_millis(self.created_at.as_deref()).unwrap_or(now);
        let updated_at = rfc3339_to_millis(self.updated_at.as_deref())
            .unwrap_or(now)
            .max(created_at);
        Note {
            id: NoteId::from(self.id),
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            created_at,
            updated_at,
            user_id: self.user_id.filter(|user_id| !user_id.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
    session: Option<SupabaseAuthResponseSession>,
}

impl SupabaseAuthResponse {
    fn into_session(self) -> BackendResult<Option<AuthSession>> {
        let nested_session = self.session;
        let access_token = self.access_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.access_token.clone())
        });
        let refresh_token = self.refresh_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.refresh_token.clone())
        });
        let expires_at = self
            .expires_at
            .or_else(|| {
                nested_session
                    .as_ref()
                    .and_then(|session| session.expires_at)
            })
            .or_else(|| {
                self.expires_in
                    .or_else(|| {
                        nested_session
                            .as_ref()
                            .and_then(|session| session.expires_in)
                    })
                    .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
            });
        let user = self
            .user
            .or_else(|| nested_session.and_then(|session| session.user))
            .map(Into::into);

        match (access_token, refresh_token, expires_at, user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }))
            }
            (None, None, None, Some(_)) => Ok(None),
            _ => Err(BackendError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponseSession {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
}

impl From<SupabaseUser> for AuthUser {
    fn from(value: SupabaseUser) -> Self {
        Self {
            id: value.id,
            email: value.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn backend(server: &mockito::Server) -> (SupabaseBackend<StoredSession>, PersistentStore) {
        let store = PersistentStore::in_memory();
        let backend = SupabaseBackend::new(
            server.url(),
            "anon",
            "http://localhost:3000/",
            StoredSession::new(store.clone()),
        )
        .unwrap();
        (backend, store)
    }

    fn session_body(user_id: &str, email: &str) -> String {
        serde_json::json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "expires_in": 3600,
            "user": { "id": user_id, "email": email }
        })
        .to_string()
    }

    #[test]
    fn normalize_auth_url_appends_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn normalize_auth_url_keeps_existing_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co/auth/v1/").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
        assert_eq!(project_url(&normalized), "https://demo.supabase.co");
    }

    #[test]
    fn normalize_auth_url_rejects_missing_scheme() {
        assert!(normalize_auth_url("demo.supabase.co").is_err());
        assert!(normalize_auth_url("  ").is_err());
    }

    #[test]
    fn response_without_session_fields_means_confirmation_required() {
        let response = SupabaseAuthResponse {
            access_token: None,
            refresh_token: None,
            expires_at: None,
            expires_in: None,
            user: Some(SupabaseUser {
                id: "user".to_string(),
                email: Some("user@example.com".to_string()),
            }),
            session: None,
        };
        assert!(response.into_session().unwrap().is_none());
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "secret-access-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            expires_at: 1_700_000_000,
            user: AuthUser {
                id: "user".to_string(),
                email: None,
            },
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn note_row_maps_timestamps_and_defaults() {
        let row: NoteRow = serde_json::from_value(serde_json::json!({
            "id": "7f3c",
            "title": null,
            "content": "body",
            "created_at": "2024-01-01T00:00:00.000Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "user_id": "user-1"
        }))
        .unwrap();
        let note = row.into_note();
        assert_eq!(note.id.as_str(), "7f3c");
        assert_eq!(note.title, "");
        assert_eq!(note.content, "body");
        assert_eq!(note.created_at, 1_704_067_200_000);
        assert_eq!(note.updated_at, 1_704_153_600_000);
        assert_eq!(note.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn note_row_from_note_uses_rfc3339() {
        let note = Note {
            id: NoteId::local(1_704_067_200_000),
            title: "T".to_string(),
            content: "C".to_string(),
            created_at: 1_704_067_200_000,
            updated_at: 1_704_067_200_500,
            user_id: Some("u".to_string()),
        };
        let row = NoteRow::from_note(&note);
        assert_eq!(row.created_at.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(row.updated_at.as_deref(), Some("2024-01-01T00:00:00.500Z"));
    }

    #[tokio::test]
    async fn sign_in_persists_session_and_notifies_subscribers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded(
                "grant_type".to_string(),
                "password".to_string(),
            ))
            .match_header("apikey", "anon")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(session_body("user-1", "u@e.com"))
            .create_async()
            .await;

        let (backend, store) = backend(&server);
        let mut changes = backend.subscribe_auth_changes();

        let user = backend
            .sign_in_with_password("u@e.com", "pw")
            .await
            .unwrap();
        assert_eq!(user, SessionUser::new("user-1", "u@e.com"));

        let change = changes.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedIn);
        assert_eq!(change.user, Some(user));

        let persisted: Option<AuthSession> = store.get(BACKEND_SESSION_KEY, None);
        assert_eq!(persisted.map(|session| session.access_token).as_deref(), Some("access"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sign_in_rejection_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
            .create_async()
            .await;

        let (backend, _) = backend(&server);
        let error = backend
            .sign_in_with_password("u@e.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(error, BackendError::AuthRejected(_)));
        assert_eq!(error.to_string(), "Invalid login credentials (400)");
    }

    #[tokio::test]
    async fn sign_up_without_session_requires_confirmation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/signup")
            .match_query(Matcher::UrlEncoded(
                "redirect_to".to_string(),
                "http://localhost:3000/".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"id":"user-2","email":"new@e.com"}"#)
            .create_async()
            .await;

        let (backend, _) = backend(&server);
        let outcome = backend
            .sign_up("new@e.com", "pw", &SignUpOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn table_calls_require_a_session() {
        let server = mockito::Server::new_async().await;
        let (backend, _) = backend(&server);
        let error = backend.select_notes("user-1").await.unwrap_err();
        assert!(matches!(error, BackendError::NoSession));
    }

    #[tokio::test]
    async fn select_notes_maps_rows_after_sign_in() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(session_body("user-1", "u@e.com"))
            .create_async()
            .await;
        let select = server
            .mock("GET", "/rest/v1/notes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".to_string(), "eq.user-1".to_string()),
                Matcher::UrlEncoded("order".to_string(), "updated_at.desc".to_string()),
            ]))
            .match_header("authorization", "Bearer access")
            .with_status(200)
            .with_body(
                serde_json::json!([
                    {
                        "id": "remote-1",
                        "title": "From server",
                        "content": "hello",
                        "created_at": "2024-01-01T00:00:00Z",
                        "updated_at": "2024-01-01T00:00:01Z",
                        "user_id": "user-1"
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let (backend, _) = backend(&server);
        backend
            .sign_in_with_password("u@e.com", "pw")
            .await
            .unwrap();
        let notes = backend.select_notes("user-1").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id.as_str(), "remote-1");
        assert_eq!(notes[0].title, "From server");
        select.assert_async().await;
    }

    #[tokio::test]
    async fn sign_out_clears_session_even_when_server_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(session_body("user-1", "u@e.com"))
            .create_async()
            .await;
        server
            .mock("POST", "/auth/v1/logout")
            .with_status(500)
            .with_body(r#"{"message":"boom"}"#)
            .create_async()
            .await;

        let (backend, store) = backend(&server);
        backend
            .sign_in_with_password("u@e.com", "pw")
            .await
            .unwrap();

        let error = backend.sign_out().await.unwrap_err();
        assert_eq!(error.to_string(), "Backend API error: boom (500)");
        assert!(backend.current_session().is_none());
        assert!(store
            .get::<Option<AuthSession>>(BACKEND_SESSION_KEY, None)
            .is_none());
    }

    #[tokio::test]
    async fn restore_session_uses_unexpired_stored_tokens() {
        let server = mockito::Server::new_async().await;
        let (backend, store) = backend(&server);
        store.set(
            BACKEND_SESSION_KEY,
            &AuthSession {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                expires_at: unix_timestamp_now() + 3_600,
                user: AuthUser {
                    id: "user-9".to_string(),
                    email: Some("nine@e.com".to_string()),
                },
            },
        );

        let user = backend.restore_session().await.unwrap();
        assert_eq!(user, Some(SessionUser::new("user-9", "nine@e.com")));
        assert!(backend.current_session().is_some());
    }
}
