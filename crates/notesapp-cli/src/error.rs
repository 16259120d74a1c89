use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesapp_core::Error),
    #[error(transparent)]
    Auth(#[from] notesapp_core::AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Edited note content cannot be empty")]
    EmptyEditedContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Search query cannot be empty")]
    EmptySearchQuery,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error(
        "Remote backend is not configured. Set NOTESAPP_SUPABASE_URL and NOTESAPP_SUPABASE_KEY to enable `notesapp sync`."
    )]
    BackendNotConfigured,
    #[error("Not signed in. Run `notesapp auth signin` first.")]
    NotSignedIn,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
