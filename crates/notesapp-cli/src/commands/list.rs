use notesapp_core::Note;

use crate::commands::common::{print_notes, AppContext};
use crate::error::CliError;

pub fn run_list(app: &AppContext, limit: usize, as_json: bool) -> Result<Vec<Note>, CliError> {
    let notes = app
        .notes
        .filtered_notes()
        .into_iter()
        .take(limit)
        .collect::<Vec<_>>();

    print_notes(&notes, as_json)?;
    Ok(notes)
}
