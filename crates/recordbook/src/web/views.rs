//! HTML pages.
//!
//! Every value that came from a user passes through [`escape`] before it is
//! written into markup.

use std::fmt::Write as _;

use crate::form::{Field, FieldErrors, RecordForm, CONTENT_MAX_CHARS, TITLE_MAX_CHARS};
use crate::record::Record;

use super::csrf::CSRF_FIELD;
use super::flash::Flash;

/// Which form is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    /// New record, posts to `/records/new`.
    Create,
    /// Existing record, posts to `/records/{id}/edit`.
    Edit(i64),
}

impl FormMode {
    fn action_url(self) -> String {
        match self {
            Self::Create => "/records/new".to_string(),
            Self::Edit(id) => format!("/records/{id}/edit"),
        }
    }

    fn heading(self) -> &'static str {
        match self {
            Self::Create => "Create Record",
            Self::Edit(_) => "Edit Record",
        }
    }
}

/// Escape text for use in HTML bodies and quoted attributes.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flash: Option<&Flash>, body: &str) -> String {
    let flash_html = flash.map_or_else(String::new, |f| {
        format!(
            "<div class=\"flash flash-{}\">{}</div>\n",
            f.level.as_str(),
            escape(&f.message)
        )
    });

    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
<meta charset=\"utf-8\">
<title>{title} - Records</title>
</head>
<body>
<nav>
<a href=\"/records\">Records</a>
<a href=\"/records/new\">New Record</a>
<a href=\"/index\">Home</a>
<a href=\"/about\">About</a>
</nav>
{flash_html}<main>
{body}
</main>
</body>
</html>
",
        title = escape(title),
    )
}

/// The list of all records.
#[must_use]
pub fn record_list(records: &[Record], flash: Option<&Flash>) -> String {
    let mut body = String::from("<h1>Records</h1>\n");

    if records.is_empty() {
        body.push_str("<p>No records yet. <a href=\"/records/new\">Create one</a>.</p>\n");
    } else {
        body.push_str("<ul class=\"records\">\n");
        for record in records {
            let _ = writeln!(
                body,
                "<li><a href=\"/records/{id}\">{title}</a> <time>{created}</time></li>",
                id = record.id,
                title = escape(&record.title),
                created = record.created_at.format("%Y-%m-%d %H:%M:%S"),
            );
        }
        body.push_str("</ul>\n");
    }

    layout("Records", flash, &body)
}

/// A single record.
#[must_use]
pub fn record_detail(record: &Record, flash: Option<&Flash>) -> String {
    let content = if record.has_content() {
        format!("<div class=\"content\">{}</div>", escape(&record.content))
    } else {
        "<p><em>No content.</em></p>".to_string()
    };

    let body = format!(
        "<h1>{title}</h1>
<p>Created <time>{created}</time></p>
{content}
<p>
<a href=\"/records/{id}/edit\">Edit</a>
<form method=\"post\" action=\"/records/{id}/delete\"><button type=\"submit\">Delete</button></form>
</p>",
        id = record.id,
        title = escape(&record.title),
        created = record.created_at.format("%Y-%m-%d %H:%M:%S"),
    );

    layout(&record.title, flash, &body)
}

fn field_errors(errors: &FieldErrors, field: Field) -> String {
    let mut out = String::new();
    for message in errors.for_field(field) {
        let _ = writeln!(
            out,
            "<span class=\"error\" data-field=\"{field}\">{}</span>",
            escape(message)
        );
    }
    out
}

/// The create or edit form, pre-filled with `values`.
///
/// `csrf_token` goes into a hidden field; the submitted `values.csrf_token`
/// is never echoed back.
#[must_use]
pub fn record_form(
    mode: FormMode,
    values: &RecordForm,
    errors: &FieldErrors,
    csrf_token: &str,
    flash: Option<&Flash>,
) -> String {
    // The newline after <textarea> is eaten by the parser, so a leading
    // newline in the content survives a round trip.
    let body = format!(
        "<h1>{heading}</h1>
<form method=\"post\" action=\"{action}\">
<input type=\"hidden\" name=\"{CSRF_FIELD}\" value=\"{csrf_token}\">
{csrf_errors}<p>
<label for=\"title\">Title</label>
<input id=\"title\" name=\"title\" type=\"text\" maxlength=\"{TITLE_MAX_CHARS}\" value=\"{title}\">
{title_errors}</p>
<p>
<label for=\"content\">Content</label>
<textarea id=\"content\" name=\"content\" maxlength=\"{CONTENT_MAX_CHARS}\">
{content}</textarea>
{content_errors}</p>
<p><button type=\"submit\">Save Record</button></p>
</form>",
        heading = mode.heading(),
        action = mode.action_url(),
        csrf_token = escape(csrf_token),
        csrf_errors = field_errors(errors, Field::CsrfToken),
        title = escape(&values.title),
        content = escape(&values.content),
        title_errors = field_errors(errors, Field::Title),
        content_errors = field_errors(errors, Field::Content),
    );

    layout(mode.heading(), flash, &body)
}

/// Static home page.
#[must_use]
pub fn home(flash: Option<&Flash>) -> String {
    layout(
        "Home",
        flash,
        "<h1>Welcome</h1>
<p>Keep short notes with a title and optional content.</p>
<p><a href=\"/records\">Browse records</a> or <a href=\"/records/new\">add a new one</a>.</p>",
    )
}

/// Static about page.
#[must_use]
pub fn about(flash: Option<&Flash>) -> String {
    layout(
        "About",
        flash,
        "<h1>About</h1>
<p>A small record keeper backed by a single SQLite table.</p>",
    )
}
