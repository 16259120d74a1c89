//! Data models for notesapp

mod note;
mod session;

pub use note::{Note, NoteDraft, NoteId, NotePatch};
pub use session::SessionUser;
