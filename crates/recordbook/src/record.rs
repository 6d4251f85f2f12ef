//! The record type persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored record.
///
/// `id` and `created_at` are assigned by the store on insert and never change
/// afterwards; edits only touch `title` and `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, never reused.
    pub id: i64,

    /// Short title, 1 to 140 characters.
    pub title: String,

    /// Free-form body, up to 2000 characters. Empty when not provided.
    pub content: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Check whether the record has any content besides its title.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}
