use notesapp_core::{Note, NoteDraft};

use crate::commands::common::{normalize_content, resolve_note_content, AppContext};
use crate::error::CliError;

pub fn run_add(
    app: &AppContext,
    title: Option<&str>,
    content_parts: &[String],
) -> Result<Note, CliError> {
    let title = title.and_then(normalize_content);
    let content = if title.is_some() {
        normalize_content(&content_parts.join(" "))
    } else {
        Some(resolve_note_content(content_parts)?)
    };

    let note = app.notes.create_note(NoteDraft { title, content });
    println!("{}", note.id);
    Ok(note)
}
