//! Note model

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::util::strip_markup;

const UNTITLED: &str = "Untitled";

/// Opaque note identifier.
///
/// Locally created notes use `local-<epoch-ms>`; notes loaded from the
/// backend keep whatever id the backend assigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Build a local id from a millisecond timestamp
    #[must_use]
    pub fn local(timestamp_ms: i64) -> Self {
        Self(format!("local-{timestamp_ms}"))
    }

    /// Build a local id that does not collide with any id accepted by `taken`
    #[must_use]
    pub fn unique_local(timestamp_ms: i64, taken: impl Fn(&Self) -> bool) -> Self {
        let base = Self::local(timestamp_ms);
        let mut candidate = base.clone();
        let mut suffix = 0u64;
        while taken(&candidate) {
            suffix += 1;
            candidate = Self(format!("{base}-{suffix}"));
        }
        candidate
    }

    /// Borrow the raw id string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was generated on this device
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for NoteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A note in the collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Title, may be empty
    #[serde(default)]
    pub title: String,
    /// Body text, may contain markup
    #[serde(default)]
    pub content: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Owning user, absent for notes created without a session
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Note {
    /// Create a note from a draft with both timestamps set to `now_ms`
    #[must_use]
    pub fn from_draft(id: NoteId, draft: NoteDraft, now_ms: i64, user_id: Option<String>) -> Self {
        Self {
            id,
            title: draft.title.unwrap_or_default(),
            content: draft.content.unwrap_or_default(),
            created_at: now_ms,
            updated_at: now_ms,
            user_id,
        }
    }

    /// Merge `patch` over this note and stamp the update time.
    ///
    /// `updated_at` never moves backwards and always advances past its
    /// previous value, even when the clock has not.
    pub fn apply_patch(&mut self, patch: NotePatch, now_ms: i64) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        self.updated_at = now_ms.max(self.updated_at.saturating_add(1));
    }

    /// Title for display, `"Untitled"` when blank
    #[must_use]
    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            UNTITLED
        } else {
            title
        }
    }

    /// Plain-text excerpt of the content, truncated to `max_chars`
    #[must_use]
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = strip_markup(&self.content);
        if text.chars().count() <= max_chars {
            return text;
        }
        let mut truncated = text.chars().take(max_chars).collect::<String>();
        truncated.push('…');
        truncated
    }

    /// Case-insensitive substring match against title or content.
    ///
    /// `needle` must already be trimmed and lowercased.
    #[must_use]
    pub fn matches_query(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.content.to_lowercase().contains(needle)
    }
}

/// Initial fields for a new note; missing fields default to empty text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NoteDraft {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NotePatch {
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}
