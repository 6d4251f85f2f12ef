//! Request handlers.

use axum::extract::{Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{AppendHeaders, Html, IntoResponse, Redirect, Response};
use axum::Form;
use tracing::{debug, info};

use crate::error::Result;
use crate::form::{Field, FieldErrors, RecordDraft, RecordForm};

use super::flash::{self, Flash, FlashSigner};
use super::views::{self, FormMode};
use super::AppState;

const LIST_URL: &str = "/records";
const NOT_FOUND_MESSAGE: &str = "Record not found.";

/// Render a page, clearing the flash cookie if one was shown and storing a
/// newly minted CSRF nonce if there is one.
fn render(flash_shown: bool, csrf_cookie: Option<HeaderValue>, html: String) -> Response {
    let cookies = flash_shown
        .then(flash::clear_cookie)
        .into_iter()
        .chain(csrf_cookie)
        .map(|cookie| (SET_COOKIE, cookie));
    (AppendHeaders(cookies), Html(html)).into_response()
}

fn page(flash_shown: bool, html: String) -> Response {
    render(flash_shown, None, html)
}

fn redirect_with(signer: &FlashSigner, flash: &Flash, to: &str) -> Result<Response> {
    let cookie = signer.set_cookie(flash)?;
    Ok(([(SET_COOKIE, cookie)], Redirect::to(to)).into_response())
}

fn not_found(signer: &FlashSigner, id: i64) -> Result<Response> {
    debug!("Record {} not found", id);
    redirect_with(signer, &Flash::error(NOT_FOUND_MESSAGE), LIST_URL)
}

fn form_page(
    state: &AppState,
    headers: &HeaderMap,
    mode: FormMode,
    values: &RecordForm,
    errors: &FieldErrors,
) -> Result<Response> {
    let csrf = state.csrf.issue(headers)?;
    let pending = state.flash.take(headers);
    let html = views::record_form(mode, values, errors, &csrf.token, pending.as_ref());
    Ok(render(pending.is_some(), csrf.cookie, html))
}

/// Validate a submitted form, refusing it without a valid CSRF token.
fn check_submission(
    state: &AppState,
    headers: &HeaderMap,
    form: &RecordForm,
) -> std::result::Result<RecordDraft, FieldErrors> {
    let validated = form.validate();
    let Err(failure) = state.csrf.verify(headers, &form.csrf_token) else {
        return validated;
    };

    debug!("Refused form submission: {}", failure);
    let mut errors = validated.err().unwrap_or_default();
    errors.add(Field::CsrfToken, failure.message());
    Err(errors)
}

pub(super) async fn list_records(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let records = state.with_store(|store| store.list()).await?;

    let pending = state.flash.take(&headers);
    Ok(page(
        pending.is_some(),
        views::record_list(&records, pending.as_ref()),
    ))
}

pub(super) async fn new_record(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    form_page(
        &state,
        &headers,
        FormMode::Create,
        &RecordForm::default(),
        &FieldErrors::default(),
    )
}

pub(super) async fn create_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RecordForm>,
) -> Result<Response> {
    let draft = match check_submission(&state, &headers, &form) {
        Ok(draft) => draft,
        Err(errors) => {
            debug!("Rejected new record: {} field errors", errors.len());
            return form_page(&state, &headers, FormMode::Create, &form, &errors);
        }
    };

    let id = state
        .with_store(move |store| store.insert(&draft.title, &draft.content))
        .await?;
    info!(id, "Created record");

    redirect_with(
        &state.flash,
        &Flash::success("Record created successfully!"),
        LIST_URL,
    )
}

pub(super) async fn view_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response> {
    let Some(record) = state.with_store(move |store| store.get(id)).await? else {
        return not_found(&state.flash, id);
    };

    let pending = state.flash.take(&headers);
    Ok(page(
        pending.is_some(),
        views::record_detail(&record, pending.as_ref()),
    ))
}

pub(super) async fn edit_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response> {
    let Some(record) = state.with_store(move |store| store.get(id)).await? else {
        return not_found(&state.flash, id);
    };

    form_page(
        &state,
        &headers,
        FormMode::Edit(id),
        &RecordForm::from_record(&record),
        &FieldErrors::default(),
    )
}

enum EditOutcome {
    NotFound,
    Invalid(FieldErrors),
    Updated,
}

pub(super) async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Form(form): Form<RecordForm>,
) -> Result<Response> {
    let validated = check_submission(&state, &headers, &form);

    // Existence is checked before validation errors are reported.
    let outcome = state
        .with_store(move |store| {
            if store.get(id)?.is_none() {
                return Ok(EditOutcome::NotFound);
            }
            match validated {
                Err(errors) => Ok(EditOutcome::Invalid(errors)),
                Ok(draft) => Ok(if store.update(id, &draft.title, &draft.content)? {
                    EditOutcome::Updated
                } else {
                    EditOutcome::NotFound
                }),
            }
        })
        .await?;

    match outcome {
        EditOutcome::NotFound => not_found(&state.flash, id),
        EditOutcome::Invalid(errors) => {
            debug!("Rejected edit of record {}: {} field errors", id, errors.len());
            form_page(&state, &headers, FormMode::Edit(id), &form, &errors)
        }
        EditOutcome::Updated => {
            info!(id, "Updated record");
            redirect_with(
                &state.flash,
                &Flash::success("Record updated successfully!"),
                &format!("/records/{id}"),
            )
        }
    }
}

pub(super) async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response> {
    let removed = state.with_store(move |store| store.delete(id)).await?;
    info!(id, removed, "Deleted record");

    redirect_with(
        &state.flash,
        &Flash::success("Record deleted successfully!"),
        LIST_URL,
    )
}

pub(super) async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let pending = state.flash.take(&headers);
    page(pending.is_some(), views::home(pending.as_ref()))
}

pub(super) async fn about(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let pending = state.flash.take(&headers);
    page(pending.is_some(), views::about(pending.as_ref()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION};
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::form::{CONTENT_MAX_CHARS, TITLE_MAX_CHARS};
    use crate::web::csrf;
    use crate::logging::init_test_logging;
    use crate::record::Record;
    use crate::storage::StoreFactory;
    use crate::web::router;

    struct TestApp {
        _dir: TempDir,
        stores: StoreFactory,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let app = Self::without_schema();
            app.stores.bootstrap().unwrap();
            app
        }

        fn without_schema() -> Self {
            init_test_logging();
            let dir = tempfile::tempdir().unwrap();
            let stores = StoreFactory::new(dir.path().join("records.db"), Duration::from_secs(1));
            let state = AppState::new(stores.clone(), "test-secret");
            Self {
                _dir: dir,
                stores,
                state,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            router(self.state.clone()).oneshot(request).await.unwrap()
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn get_with_cookie(&self, uri: &str, cookie: &str) -> Response {
            self.send(
                Request::get(uri)
                    .header(COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        }

        /// A nonce cookie pair and a token signed for it.
        fn csrf(&self) -> (String, String) {
            let issued = self.state.csrf.issue(&HeaderMap::new()).unwrap();
            let cookie = issued.cookie.unwrap();
            let pair = cookie.to_str().unwrap().split(';').next().unwrap().to_string();
            (pair, issued.token)
        }

        /// Submit a form the way a browser holding a rendered page would.
        async fn post_form(&self, uri: &str, body: String) -> Response {
            let (cookie, token) = self.csrf();
            let body = if body.is_empty() {
                format!("csrf_token={token}")
            } else {
                format!("{body}&csrf_token={token}")
            };
            self.post_raw(uri, body, Some(&cookie)).await
        }

        async fn post_raw(&self, uri: &str, body: String, cookie: Option<&str>) -> Response {
            let mut request =
                Request::post(uri).header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(cookie) = cookie {
                request = request.header(COOKIE, cookie);
            }
            self.send(request.body(Body::from(body)).unwrap()).await
        }

        fn records(&self) -> Vec<Record> {
            self.stores.open().unwrap().list().unwrap()
        }

        fn insert(&self, title: &str, content: &str) -> i64 {
            self.stores.open().unwrap().insert(title, content).unwrap()
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn set_cookie_named<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find(|h| h.starts_with(&format!("{name}=")))
    }

    fn hidden_token(body: &str) -> String {
        let marker = "name=\"csrf_token\" value=\"";
        let start = body.find(marker).unwrap() + marker.len();
        let end = start + body[start..].find('"').unwrap();
        body[start..end].to_string()
    }

    fn location(response: &Response) -> &str {
        response.headers()[LOCATION].to_str().unwrap()
    }

    /// The `name=value` pair a browser would send back.
    fn flash_cookie(response: &Response) -> String {
        let header = response.headers()[SET_COOKIE].to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    async fn assert_flash(app: &TestApp, redirect: &Response, expected: &str) {
        let followed = app
            .get_with_cookie(location(redirect), &flash_cookie(redirect))
            .await;
        assert_eq!(followed.status(), StatusCode::OK);
        assert!(flash::is_cleared(followed.headers()));
        assert!(body_text(followed).await.contains(expected));
    }

    #[tokio::test]
    async fn test_list_empty() {
        let app = TestApp::new();

        for uri in ["/", "/records"] {
            let response = app.get(uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains("No records yet"));
        }
    }

    #[tokio::test]
    async fn test_new_record_form() {
        let app = TestApp::new();
        let response = app.get("/records/new").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie_named(&response, csrf::CSRF_COOKIE).is_some());
        let body = body_text(response).await;
        assert!(body.contains("Create Record"));
        assert!(body.contains("action=\"/records/new\""));
        assert!(!hidden_token(&body).is_empty());
    }

    #[tokio::test]
    async fn test_rendered_form_token_round_trip() {
        let app = TestApp::new();

        let response = app.get("/records/new").await;
        let cookie = set_cookie_named(&response, csrf::CSRF_COOKIE)
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        let token = hidden_token(&body_text(response).await);

        let response = app
            .post_raw(
                "/records/new",
                format!("title=From+the+page&csrf_token={token}"),
                Some(&cookie),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(app.records()[0].title, "From the page");

        // A client that already holds a nonce keeps it.
        let response = app.get_with_cookie("/records/new", &cookie).await;
        assert!(set_cookie_named(&response, csrf::CSRF_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_create_without_csrf_token_writes_nothing() {
        let app = TestApp::new();

        let response = app
            .post_raw("/records/new", "title=Forged&content=x".to_string(), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie_named(&response, csrf::CSRF_COOKIE).is_some());
        let body = body_text(response).await;
        assert!(body.contains("The CSRF token is missing."));
        assert!(body.contains("Forged"));
        assert!(app.records().is_empty());

        let (cookie, _) = app.csrf();
        let response = app
            .post_raw("/records/new", "title=Forged".to_string(), Some(&cookie))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("The CSRF token is missing."));
        assert!(app.records().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_foreign_token_writes_nothing() {
        let app = TestApp::new();
        let (victim_cookie, _) = app.csrf();
        let (_, attacker_token) = app.csrf();

        let response = app
            .post_raw(
                "/records/new",
                format!("title=Forged&csrf_token={attacker_token}"),
                Some(&victim_cookie),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("The CSRF token is invalid."));

        let response = app
            .post_raw(
                "/records/new",
                format!("title=Forged&csrf_token={attacker_token}"),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response)
            .await
            .contains("The CSRF session token is missing."));

        assert!(app.records().is_empty());
    }

    #[tokio::test]
    async fn test_edit_without_csrf_token_keeps_record() {
        let app = TestApp::new();
        let id = app.insert("Original", "body");

        let response = app
            .post_raw(
                &format!("/records/{id}/edit"),
                "title=Overwritten&content=gone".to_string(),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("The CSRF token is missing."));
        assert!(body.contains("Edit Record"));

        let record = app.records().remove(0);
        assert_eq!(record.title, "Original");
        assert_eq!(record.content, "body");
    }

    #[tokio::test]
    async fn test_edit_round_trips_leading_newline() {
        let app = TestApp::new();
        let id = app.insert("Poem", "\n  indented");

        let body = body_text(app.get(&format!("/records/{id}/edit")).await).await;
        assert!(body.contains(">\n\n  indented</textarea>"));
    }

    #[tokio::test]
    async fn test_create_then_view() {
        let app = TestApp::new();

        let response = app
            .post_form("/records/new", "title=Shopping&content=milk+and+eggs".to_string())
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/records");
        assert_flash(&app, &response, "Record created successfully!").await;

        let records = app.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.title, "Shopping");
        assert_eq!(record.content, "milk and eggs");

        let response = app.get(&format!("/records/{}", record.id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Shopping"));
        assert!(body.contains("milk and eggs"));
    }

    #[tokio::test]
    async fn test_create_without_content() {
        let app = TestApp::new();
        let response = app.post_form("/records/new", "title=Bare".to_string()).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(app.records()[0].content, "");
    }

    #[tokio::test]
    async fn test_create_empty_title_rejected() {
        let app = TestApp::new();
        let response = app
            .post_form("/records/new", "title=&content=orphaned".to_string())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("This field is required."));
        assert!(body.contains("orphaned"));
        assert!(app.records().is_empty());
    }

    #[tokio::test]
    async fn test_create_length_limits() {
        let app = TestApp::new();

        let too_long_title = format!("title={}", "t".repeat(TITLE_MAX_CHARS + 1));
        let response = app.post_form("/records/new", too_long_title).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response)
            .await
            .contains("Field must be between 1 and 140 characters long."));

        let too_long_content = format!("title=t&content={}", "c".repeat(CONTENT_MAX_CHARS + 1));
        let response = app.post_form("/records/new", too_long_content).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response)
            .await
            .contains("Field cannot be longer than 2000 characters."));

        assert!(app.records().is_empty());

        let at_limit = format!(
            "title={}&content={}",
            "t".repeat(TITLE_MAX_CHARS),
            "c".repeat(CONTENT_MAX_CHARS)
        );
        let response = app.post_form("/records/new", at_limit).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(app.records().len(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let app = TestApp::new();
        for title in ["alpha", "bravo", "charlie"] {
            let response = app.post_form("/records/new", format!("title={title}")).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }

        let body = body_text(app.get("/records").await).await;
        let alpha = body.find("alpha").unwrap();
        let bravo = body.find("bravo").unwrap();
        let charlie = body.find("charlie").unwrap();
        assert!(charlie < bravo && bravo < alpha);
        assert_eq!(app.records().len(), 3);
    }

    #[tokio::test]
    async fn test_view_missing_redirects_with_flash() {
        let app = TestApp::new();
        let response = app.get("/records/404").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/records");
        assert_flash(&app, &response, "Record not found.").await;
    }

    #[tokio::test]
    async fn test_edit_form_prefilled() {
        let app = TestApp::new();
        let id = app.insert("Draft <1>", "first pass");

        let response = app.get(&format!("/records/{id}/edit")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("value=\"Draft &lt;1&gt;\""));
        assert!(body.contains("first pass"));
        assert!(body.contains(&format!("action=\"/records/{id}/edit\"")));
    }

    #[tokio::test]
    async fn test_edit_missing_redirects() {
        let app = TestApp::new();

        let response = app.get("/records/77/edit").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/records");

        let response = app
            .post_form("/records/77/edit", "title=ghost".to_string())
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_flash(&app, &response, "Record not found.").await;
        assert!(app.records().is_empty());
    }

    #[tokio::test]
    async fn test_edit_updates_only_title_and_content() {
        let app = TestApp::new();
        let id = app.insert("Before", "old");
        let before = app.records().remove(0);

        let response = app
            .post_form(&format!("/records/{id}/edit"), "title=After&content=new".to_string())
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), format!("/records/{id}"));
        assert_flash(&app, &response, "Record updated successfully!").await;

        let after = app.records().remove(0);
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.title, "After");
        assert_eq!(after.content, "new");
    }

    #[tokio::test]
    async fn test_edit_invalid_keeps_record() {
        let app = TestApp::new();
        let id = app.insert("Stable", "unchanged");

        let response = app
            .post_form(&format!("/records/{id}/edit"), "title=&content=lost".to_string())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("This field is required."));
        assert!(body.contains("Edit Record"));

        let record = app.records().remove(0);
        assert_eq!(record.title, "Stable");
        assert_eq!(record.content, "unchanged");
    }

    #[tokio::test]
    async fn test_delete_via_post_and_get() {
        let app = TestApp::new();
        let first = app.insert("first", "");
        let second = app.insert("second", "");

        let response = app
            .post_form(&format!("/records/{first}/delete"), String::new())
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/records");
        assert_flash(&app, &response, "Record deleted successfully!").await;

        let response = app.get(&format!("/records/{second}/delete")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        assert!(app.records().is_empty());
        let body = body_text(app.get("/records").await).await;
        assert!(!body.contains("first"));
        assert!(!body.contains("second"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let app = TestApp::new();
        let id = app.insert("once", "");

        for _ in 0..2 {
            let response = app.get(&format!("/records/{id}/delete")).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_flash(&app, &response, "Record deleted successfully!").await;
        }

        let response = app.get("/records/999999/delete").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_static_pages() {
        let app = TestApp::without_schema();

        let response = app.get("/index").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Welcome"));

        let response = app.get("/about").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("About"));
    }

    #[tokio::test]
    async fn test_non_numeric_id_rejected() {
        let app = TestApp::new();
        let response = app.get("/records/abc").await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_tampered_flash_ignored() {
        let app = TestApp::new();
        let forged = FlashSigner::new("other-secret")
            .encode(&Flash::error("forged"))
            .unwrap();

        let response = app
            .get_with_cookie("/records", &format!("{}={forged}", flash::FLASH_COOKIE))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!body_text(response).await.contains("forged"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error() {
        // No schema, so every query fails
        let app = TestApp::without_schema();

        let response = app.get("/records").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app.post_form("/records/new", "title=x".to_string()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
