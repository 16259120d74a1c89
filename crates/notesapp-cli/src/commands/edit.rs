use notesapp_core::{Note, NotePatch};

use crate::commands::common::{
    capture_editor_input_with_initial, normalize_note_identifier, resolve_note, AppContext,
};
use crate::error::CliError;

pub fn run_edit(
    app: &AppContext,
    id: &str,
    title: Option<String>,
    content: Option<String>,
) -> Result<Note, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, &app.notes)?;

    let patch = if title.is_some() || content.is_some() {
        NotePatch { title, content }
    } else {
        let Some(edited_content) = capture_editor_input_with_initial(&note.content)? else {
            return Err(CliError::EmptyEditedContent);
        };
        NotePatch::content(edited_content)
    };

    let unchanged = patch.title.as_deref().unwrap_or(&note.title) == note.title
        && patch.content.as_deref().unwrap_or(&note.content) == note.content;
    if unchanged {
        println!("{}", note.id);
        return Ok(note);
    }

    let updated = app
        .notes
        .update_note(&note.id, patch)
        .ok_or_else(|| CliError::NoteNotFound(normalized_id.clone()))?;
    println!("{}", updated.id);
    Ok(updated)
}
