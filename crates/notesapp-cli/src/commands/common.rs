use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use notesapp_core::{
    AppConfig, AuthStore, BackendAccessor, FileStorage, Note, NotesStore, PersistentStore,
    RemoteSync,
};
use serde::Serialize;

use crate::error::CliError;

/// Stores shared by every command, built once per invocation.
pub struct AppContext {
    pub backend: BackendAccessor,
    pub auth: AuthStore,
    pub notes: NotesStore,
}

impl AppContext {
    pub fn new(config: &AppConfig, storage: PersistentStore) -> Self {
        let backend = BackendAccessor::from_config(config, storage.clone());
        Self::with_backend(config, storage, backend)
    }

    pub fn with_backend(
        config: &AppConfig,
        storage: PersistentStore,
        backend: BackendAccessor,
    ) -> Self {
        let auth = AuthStore::new(storage.clone(), backend.clone(), config);
        let notes = NotesStore::new(storage, backend.clone(), auth.clone(), config);
        Self {
            backend,
            auth,
            notes,
        }
    }

    /// Open the file-backed stores under `data_dir` and mount them.
    pub async fn open(config: &AppConfig, data_dir: &Path) -> Result<Self, CliError> {
        std::fs::create_dir_all(data_dir)?;
        let storage = PersistentStore::new(std::sync::Arc::new(FileStorage::new(data_dir)));
        let app = Self::new(config, storage);
        app.mount().await;
        Ok(app)
    }

    /// Restore the session, then load the signed-in user's remote notes.
    pub async fn mount(&self) -> RemoteSync {
        self.auth.mount().await;
        self.notes.mount().await
    }

    /// Let background remote writes finish before the process exits.
    pub async fn finish(&self) {
        self.notes.wait_for_mirrors().await;
        self.notes.unmount();
        self.auth.unmount();
    }
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub user_id: Option<String>,
}

pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, CliError> {
    let path = config_path.map_or_else(default_config_path, Path::to_path_buf);
    Ok(AppConfig::load(&path)?)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join("notesapp")
        .join("config.json")
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>, config: &AppConfig) -> PathBuf {
    cli_data_dir
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(default_data_dir)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("notesapp")
}

/// Find a note by exact id or by a unique id prefix.
pub fn resolve_note(note_query: &str, notes: &NotesStore) -> Result<Note, CliError> {
    let all_notes = notes.notes();
    if let Some(note) = all_notes.iter().find(|note| note.id.as_str() == note_query) {
        return Ok(note.clone());
    }

    let matching = all_notes
        .iter()
        .filter(|note| note.id.as_str().starts_with(note_query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::NoteNotFound(note_query.to_string())),
        [note] => Ok((*note).clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| note.id.to_string())
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{note_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.to_string();
            let title = truncate_chars(note.display_title(), 24);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            format!("{id:<20}  {title:<24}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
        user_id: note.user_id.clone(),
    }
}

pub fn print_notes(notes: &[Note], as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(notes) {
            println!("{line}");
        }
    }
    Ok(())
}

/// First line of the plain-text content, whitespace collapsed.
pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let text = note.excerpt(usize::MAX);
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = value.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_search_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySearchQuery)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("notesapp-note-{}-{now}.md", std::process::id()))
}
