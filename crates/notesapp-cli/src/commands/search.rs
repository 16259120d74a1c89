use notesapp_core::Note;

use crate::commands::common::{normalize_search_query, print_notes, AppContext};
use crate::error::CliError;

pub fn run_search(
    app: &AppContext,
    query: &str,
    limit: usize,
    as_json: bool,
) -> Result<Vec<Note>, CliError> {
    let normalized_query = normalize_search_query(query)?;
    app.notes.set_search(normalized_query);
    app.notes.flush_search();

    let notes = app
        .notes
        .filtered_notes()
        .into_iter()
        .take(limit)
        .collect::<Vec<_>>();

    print_notes(&notes, as_json)?;
    Ok(notes)
}
