use notesapp_core::Note;

use crate::commands::common::{
    format_timestamp, normalize_note_identifier, note_to_list_item, resolve_note, AppContext,
};
use crate::error::CliError;

pub fn run_show(app: &AppContext, id: &str, as_json: bool) -> Result<Note, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, &app.notes)?;
    app.notes.select_note(Some(note.id.clone()));

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&note_to_list_item(&note))?
        );
        return Ok(note);
    }

    println!("# {}", note.display_title());
    println!("id:      {}", note.id);
    println!("created: {}", format_timestamp(note.created_at));
    println!("updated: {}", format_timestamp(note.updated_at));
    if !note.content.is_empty() {
        println!();
        println!("{}", note.content);
    }
    Ok(note)
}
