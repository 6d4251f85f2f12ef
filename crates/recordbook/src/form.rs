//! Record form input and validation.
//!
//! Create and edit share one set of rules. Validation never mutates the input:
//! a passing form is stored exactly as submitted.

use std::fmt;

use serde::Deserialize;

use crate::record::Record;

/// Maximum title length, in characters.
pub const TITLE_MAX_CHARS: usize = 140;

/// Maximum content length, in characters.
pub const CONTENT_MAX_CHARS: usize = 2000;

/// Raw form submission for creating or editing a record.
///
/// Missing fields deserialize as empty strings so that an absent title is
/// reported as a validation error rather than a rejected request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecordForm {
    /// Submitted title.
    pub title: String,
    /// Submitted content.
    pub content: String,
    /// Anti-forgery token from the hidden form field.
    pub csrf_token: String,
}

/// Form input that passed validation and may be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    /// Validated title.
    pub title: String,
    /// Validated content.
    pub content: String,
}

/// A form field that can carry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// The title input.
    Title,
    /// The content textarea.
    Content,
    /// The hidden anti-forgery token.
    CsrfToken,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::Content => write!(f, "content"),
            Self::CsrfToken => write!(f, "csrf_token"),
        }
    }
}

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// The offending field.
    pub field: Field,
    /// Human-readable message shown next to the field.
    pub message: String,
}

/// All validation failures for a submission, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    /// Record a failure for `field`.
    pub fn add(&mut self, field: Field, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    /// Check if no errors were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Messages recorded for one field.
    pub fn for_field(&self, field: Field) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl RecordForm {
    /// Build a form pre-filled with a stored record's values.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            title: record.title.clone(),
            content: record.content.clone(),
            csrf_token: String::new(),
        }
    }

    /// Validate the title and content.
    ///
    /// The anti-forgery token is checked by the web layer, which holds the key.
    ///
    /// # Errors
    ///
    /// Returns every field constraint the submission violates.
    pub fn validate(&self) -> Result<RecordDraft, FieldErrors> {
        let mut errors = FieldErrors::default();

        // A whitespace-only title counts as missing.
        if self.title.trim().is_empty() {
            errors.add(Field::Title, "This field is required.");
        } else if self.title.chars().count() > TITLE_MAX_CHARS {
            errors.add(
                Field::Title,
                format!("Field must be between 1 and {TITLE_MAX_CHARS} characters long."),
            );
        }

        if self.content.chars().count() > CONTENT_MAX_CHARS {
            errors.add(
                Field::Content,
                format!("Field cannot be longer than {CONTENT_MAX_CHARS} characters."),
            );
        }

        if errors.is_empty() {
            Ok(RecordDraft {
                title: self.title.clone(),
                content: self.content.clone(),
            })
        } else {
            Err(errors)
        }
    }
}
