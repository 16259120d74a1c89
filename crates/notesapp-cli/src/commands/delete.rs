use notesapp_core::NoteId;

use crate::commands::common::{normalize_note_identifier, resolve_note, AppContext};
use crate::error::CliError;

pub fn run_delete(app: &AppContext, id: &str) -> Result<NoteId, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, &app.notes)?;

    app.notes.delete_note(&note.id);
    println!("{}", note.id);
    Ok(note.id)
}
