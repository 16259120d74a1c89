//! Notes Store: the note collection, search query and selection.
//!
//! Every mutation commits to memory and re-persists the whole collection
//! before returning. When a backend and a session are both present the change
//! is then mirrored remotely in the background; the local copy always wins.

mod mirror;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::AuthStore;
use crate::backend::BackendAccessor;
use crate::config::AppConfig;
use crate::debounce::Debouncer;
use crate::models::{Note, NoteDraft, NoteId, NotePatch, SessionUser};
use crate::state::{AuthState, RemoteSync};
use crate::storage::PersistentStore;
use crate::util::now_millis;

pub use mirror::{MirrorFailure, MirrorOperation, MIRROR_FAILURE_LIMIT};
use mirror::{Mirror, MirrorJob};

/// Storage key of the persisted collection.
pub const NOTES_KEY: &str = "notes:data";

/// Snapshot of the Notes Store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesState {
    /// Stored collection, newest creations first.
    pub notes: Vec<Note>,
    /// Raw query as typed.
    pub search: String,
    /// Query that drives filtering once input has settled.
    pub debounced_search: String,
    pub selected_note_id: Option<NoteId>,
}

impl NotesState {
    /// Notes matching the settled query, most recently updated first.
    #[must_use]
    pub fn filtered_notes(&self) -> Vec<Note> {
        filter_notes(&self.notes, &self.debounced_search)
    }

    /// The selected note. A dangling selection reads as no selection.
    #[must_use]
    pub fn selected_note(&self) -> Option<&Note> {
        let id = self.selected_note_id.as_ref()?;
        self.notes.iter().find(|note| &note.id == id)
    }
}

/// Filter by a case-insensitive substring and sort by recency.
///
/// A blank query keeps every note. Ties on `updated_at` are broken by id so
/// the order is deterministic.
#[must_use]
pub fn filter_notes(notes: &[Note], query: &str) -> Vec<Note> {
    let needle = query.trim().to_lowercase();
    let mut matches = notes
        .iter()
        .filter(|note| needle.is_empty() || note.matches_query(&needle))
        .cloned()
        .collect::<Vec<_>>();
    matches.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches
}

/// Local edits made while a remote load is in flight.
#[derive(Debug, Default)]
struct EditLog {
    revision: u64,
    loads_in_flight: usize,
    touched: HashMap<NoteId, u64>,
}

impl EditLog {
    fn record(&mut self, id: &NoteId) {
        self.revision += 1;
        if self.loads_in_flight > 0 {
            self.touched.insert(id.clone(), self.revision);
        }
    }

    fn begin_load(&mut self) -> u64 {
        self.loads_in_flight += 1;
        self.revision
    }

    fn end_load(&mut self) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if self.loads_in_flight == 0 {
            self.touched.clear();
        }
    }

    fn touched_since(&self, revision: u64) -> HashSet<NoteId> {
        self.touched
            .iter()
            .filter(|(_, touched_at)| **touched_at > revision)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Marks a remote load as in flight until dropped.
struct LoadGuard<'a> {
    inner: &'a NotesInner,
    started_at: u64,
}

impl<'a> LoadGuard<'a> {
    fn new(inner: &'a NotesInner) -> Self {
        let started_at = inner.edits().begin_load();
        Self { inner, started_at }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.inner.edits().end_load();
    }
}

struct NotesInner {
    storage: PersistentStore,
    backend: BackendAccessor,
    auth: AuthStore,
    state: Arc<watch::Sender<NotesState>>,
    search: Debouncer<String>,
    mirror: Mirror,
    remote_timeout: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
    torn_down: Arc<AtomicBool>,
    edits: Mutex<EditLog>,
}

impl NotesInner {
    /// Apply `change` to the state and persist the collection when it reports
    /// a modification.
    fn commit(&self, change: impl FnOnce(&mut NotesState) -> bool) -> bool {
        self.state.send_if_modified(|state| {
            let modified = change(state);
            if modified {
                self.storage.set(NOTES_KEY, &state.notes);
            }
            modified
        })
    }

    fn edits(&self) -> MutexGuard<'_, EditLog> {
        self.edits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NotesInner {
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

/// Cheap-to-clone handle to the note collection.
#[derive(Clone)]
pub struct NotesStore {
    inner: Arc<NotesInner>,
}

impl NotesStore {
    /// Create the store, loading the persisted collection from `storage`.
    pub fn new(
        storage: PersistentStore,
        backend: BackendAccessor,
        auth: AuthStore,
        config: &AppConfig,
    ) -> Self {
        let mut notes = storage.get::<Vec<Note>>(NOTES_KEY, Vec::new());
        dedupe_ids(&mut notes);
        tracing::debug!("Loaded {} notes from local storage", notes.len());

        let (state, _) = watch::channel(NotesState {
            notes,
            ..NotesState::default()
        });
        let state = Arc::new(state);
        let torn_down = Arc::new(AtomicBool::new(false));
        let search = Debouncer::new(
            config.search_debounce(),
            settle_search(Arc::downgrade(&state), Arc::clone(&torn_down)),
        );

        Self {
            inner: Arc::new(NotesInner {
                storage,
                backend,
                auth,
                state,
                search,
                mirror: Mirror::default(),
                remote_timeout: config.auth_timeout(),
                watcher: Mutex::new(None),
                torn_down,
                edits: Mutex::new(EditLog::default()),
            }),
        }
    }

    pub fn notes(&self) -> Vec<Note> {
        self.inner.state.borrow().notes.clone()
    }

    pub fn filtered_notes(&self) -> Vec<Note> {
        self.inner.state.borrow().filtered_notes()
    }

    pub fn note(&self, id: &NoteId) -> Option<Note> {
        self.inner
            .state
            .borrow()
            .notes
            .iter()
            .find(|note| &note.id == id)
            .cloned()
    }

    pub fn search(&self) -> String {
        self.inner.state.borrow().search.clone()
    }

    pub fn debounced_search(&self) -> String {
        self.inner.state.borrow().debounced_search.clone()
    }

    pub fn selected_note_id(&self) -> Option<NoteId> {
        self.inner.state.borrow().selected_note_id.clone()
    }

    pub fn selected_note(&self) -> Option<Note> {
        self.inner.state.borrow().selected_note().cloned()
    }

    pub fn snapshot(&self) -> NotesState {
        self.inner.state.borrow().clone()
    }

    /// Receive every later state change.
    pub fn subscribe(&self) -> watch::Receiver<NotesState> {
        self.inner.state.subscribe()
    }

    /// Select `id` without checking that it exists.
    pub fn select_note(&self, id: Option<NoteId>) {
        self.inner.state.send_if_modified(|state| {
            if state.selected_note_id == id {
                false
            } else {
                state.selected_note_id = id;
                true
            }
        });
    }

    /// Prepend a new note built from `draft` and select it.
    pub fn create_note(&self, draft: NoteDraft) -> Note {
        let user = self.inner.auth.user();
        let user_id = user.as_ref().map(|user| user.id.clone());
        let now = now_millis();
        let mut note = Note::from_draft(NoteId::local(now), draft, now, user_id);

        self.inner.commit(|state| {
            note.id = NoteId::unique_local(now, |candidate| {
                state.notes.iter().any(|existing| &existing.id == candidate)
            });
            state.selected_note_id = Some(note.id.clone());
            state.notes.insert(0, note.clone());
            self.inner.edits().record(&note.id);
            true
        });

        tracing::debug!("Created note {}", note.id);
        self.mirror(user.as_ref(), |_| MirrorJob::Insert(note.clone()));
        note
    }

    /// Merge `patch` into note `id`. Unknown ids are ignored.
    pub fn update_note(&self, id: &NoteId, patch: NotePatch) -> Option<Note> {
        let mut updated = None;
        self.inner.commit(|state| {
            let Some(note) = state.notes.iter_mut().find(|note| &note.id == id) else {
                return false;
            };
            note.apply_patch(patch, now_millis());
            updated = Some(note.clone());
            self.inner.edits().record(id);
            true
        });

        let Some(note) = updated else {
            tracing::debug!("Ignoring update of unknown note {}", id);
            return None;
        };
        self.mirror(self.inner.auth.user().as_ref(), |_| {
            MirrorJob::Update(note.clone())
        });
        Some(note)
    }

    /// Remove note `id`, clearing the selection if it pointed there.
    pub fn delete_note(&self, id: &NoteId) -> bool {
        let removed = self.inner.commit(|state| {
            let Some(index) = state.notes.iter().position(|note| &note.id == id) else {
                return false;
            };
            state.notes.remove(index);
            if state.selected_note_id.as_ref() == Some(id) {
                state.selected_note_id = None;
            }
            self.inner.edits().record(id);
            true
        });

        if removed {
            self.mirror(self.inner.auth.user().as_ref(), |user| MirrorJob::Delete {
                user_id: user.id.clone(),
                id: id.clone(),
            });
        } else {
            tracing::debug!("Ignoring delete of unknown note {}", id);
        }
        removed
    }

    /// Update the raw query. Filtering follows once input has settled.
    pub fn set_search(&self, query: impl Into<String>) {
        let query = query.into();
        self.inner.state.send_if_modified(|state| {
            if state.search == query {
                false
            } else {
                state.search.clone_from(&query);
                true
            }
        });
        self.inner.search.push(query);
    }

    /// Apply a pending query immediately.
    pub fn flush_search(&self) {
        self.inner.search.flush();
    }

    /// Recent remote mirror failures, oldest first.
    pub fn mirror_failures(&self) -> Vec<MirrorFailure> {
        self.inner.mirror.failures()
    }

    /// Wait until every remote mirror started so far has finished.
    pub async fn wait_for_mirrors(&self) {
        self.inner.mirror.settle().await;
    }

    /// Replace local notes with the signed-in user's remote collection.
    ///
    /// Notes created, updated or deleted locally while the fetch was in
    /// flight keep their local state. Any failure leaves the local collection
    /// untouched.
    pub async fn sync_from_remote(&self) -> RemoteSync {
        let Some(client) = self.inner.backend.get_client() else {
            return RemoteSync::Skipped;
        };
        let Some(user) = self.inner.auth.user() else {
            tracing::debug!("No session; keeping local notes");
            return RemoteSync::Skipped;
        };

        let load = LoadGuard::new(&self.inner);
        let fetched =
            match tokio::time::timeout(self.inner.remote_timeout, client.select_notes(&user.id))
                .await
            {
                Ok(result) => result.map_err(|error| error.to_string()),
                Err(_) => Err(format!(
                    "request timed out after {}s",
                    self.inner.remote_timeout.as_secs()
                )),
            };

        let mut notes = match fetched {
            Ok(notes) => notes,
            Err(message) => {
                tracing::warn!("Failed to load notes from backend, staying offline: {}", message);
                return RemoteSync::Failed(message);
            }
        };

        let still_current = self
            .inner
            .auth
            .user()
            .is_some_and(|current| current.id == user.id);
        if self.is_torn_down() || !still_current {
            tracing::debug!("Discarding remote notes for a stale session");
            return RemoteSync::Skipped;
        }

        dedupe_ids(&mut notes);
        let mut count = 0;
        self.inner.commit(|state| {
            let touched = self.inner.edits().touched_since(load.started_at);
            if !touched.is_empty() {
                tracing::debug!("Keeping {} local edits made during remote load", touched.len());
            }
            state.notes = merge_remote(&state.notes, notes, &touched);
            count = state.notes.len();
            true
        });
        drop(load);
        tracing::info!("Loaded {} notes from backend", count);
        RemoteSync::Replaced(count)
    }

    /// Load the remote collection and reload it whenever a different user
    /// signs in.
    pub async fn mount(&self) -> RemoteSync {
        self.inner.torn_down.store(false, Ordering::SeqCst);
        let outcome = self.sync_from_remote().await;

        let mut auth = self.inner.auth.subscribe();
        let signed_in = signed_in_id(&mut auth);
        let watcher = tokio::spawn(follow_session(
            Arc::downgrade(&self.inner),
            auth,
            signed_in,
        ));
        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.abort();
        }
        outcome
    }

    /// Stop reacting to session changes and drop any pending search update.
    pub fn unmount(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        self.inner.search.cancel();
        if let Some(watcher) = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }

    fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    fn mirror(&self, user: Option<&SessionUser>, job: impl FnOnce(&SessionUser) -> MirrorJob) {
        let Some(user) = user else {
            return;
        };
        let Some(client) = self.inner.backend.get_client() else {
            return;
        };
        self.inner.mirror.spawn(client, job(user));
    }
}

impl std::fmt::Debug for NotesStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        formatter
            .debug_struct("NotesStore")
            .field("notes", &state.notes.len())
            .field("search", &state.search)
            .field("selected_note_id", &state.selected_note_id)
            .finish_non_exhaustive()
    }
}

fn settle_search(
    state: Weak<watch::Sender<NotesState>>,
    torn_down: Arc<AtomicBool>,
) -> impl Fn(String) + Send + Sync + 'static {
    move |query| {
        if torn_down.load(Ordering::SeqCst) {
            return;
        }
        let Some(state) = state.upgrade() else {
            return;
        };
        state.send_if_modified(|state| {
            if state.debounced_search == query {
                false
            } else {
                state.debounced_search = query;
                true
            }
        });
    }
}

async fn follow_session(
    inner: Weak<NotesInner>,
    mut auth: watch::Receiver<AuthState>,
    mut current: Option<String>,
) {
    while auth.changed().await.is_ok() {
        let user_id = signed_in_id(&mut auth);
        if user_id == current {
            continue;
        }
        current = user_id;
        if current.is_none() {
            continue;
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let store = NotesStore { inner };
        if store.is_torn_down() {
            break;
        }
        store.sync_from_remote().await;
    }
}

fn signed_in_id(auth: &mut watch::Receiver<AuthState>) -> Option<String> {
    auth.borrow_and_update()
        .user
        .as_ref()
        .map(|user| user.id.clone())
}

/// Adopt `remote`, except for notes in `touched`, whose local state wins.
fn merge_remote(local: &[Note], remote: Vec<Note>, touched: &HashSet<NoteId>) -> Vec<Note> {
    let local_only = local
        .iter()
        .filter(|note| touched.contains(&note.id))
        .filter(|note| !remote.iter().any(|row| row.id == note.id))
        .cloned()
        .collect::<Vec<_>>();
    let adopted = remote.into_iter().filter_map(|row| {
        if touched.contains(&row.id) {
            local.iter().find(|note| note.id == row.id).cloned()
        } else {
            Some(row)
        }
    });
    local_only.into_iter().chain(adopted).collect()
}

fn dedupe_ids(notes: &mut Vec<Note>) {
    let mut seen = HashSet::new();
    let before = notes.len();
    notes.retain(|note| seen.insert(note.id.clone()));
    if notes.len() != before {
        tracing::warn!("Dropped {} notes with duplicate ids", before - notes.len());
    }
}
