//! notesapp-core - Core library for notesapp
//!
//! This crate contains the models, local persistence, optional remote backend
//! and the two stores (auth and notes) that every notesapp interface drives.

pub mod auth;
pub mod backend;
pub mod config;
pub mod debounce;
pub mod error;
pub mod models;
pub mod notes;
pub mod state;
pub mod storage;
pub mod util;

#[cfg(test)]
mod testing;

pub use auth::{AuthError, AuthStore, SignUpOutcome};
pub use backend::{BackendAccessor, BackendClient, BackendError};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use models::{Note, NoteDraft, NoteId, NotePatch, SessionUser};
pub use notes::{MirrorFailure, NotesState, NotesStore};
pub use state::{AuthState, AuthStatus, RemoteSync};
pub use storage::{FileStorage, MemoryStorage, PersistentStore, StorageBackend};
