//! HTTP request handlers.
//!
//! Every entity is scoped to the authenticated user. Another user's entity
//! is reported as not found, never as forbidden.

use crate::analytics::{DEFAULT_SUMMARY_DAYS, NewGoal, NewSession, Summary};
use crate::db::{self, BookFilter, ReadingGoal, ReadingSession};
use crate::error::{AppError, Result};
use crate::formats::{self, cover};
use crate::library::{
    Book, BookUpdate, Bookmark, BookmarkPatch, Collection, Highlight, HighlightColor,
    HighlightPatch, HighlightPosition, Location, ProgressUpdate,
};
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

const MAX_COLLECTION_NAME: usize = 100;

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
    display_name: Option<String>,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: db::User,
}

/// Auth register. Logs the new user in.
pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    state
        .auth
        .register(&req.username, &req.password, req.display_name)?;
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    Ok((StatusCode::CREATED, Json(LoginResponse { token, user })))
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.username, &req.password)?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(LoginResponse { token, user }))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

// ============================================================================
// BOOK HANDLERS
// ============================================================================

/// List the user's books.
pub async fn list_books(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<BookFilter>,
) -> Result<Json<Vec<Book>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.list_books(&user.id, &filter)?))
}

/// Book metadata.
pub async fn get_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(owned_book(&state, &user.id, &id)?))
}

/// Edit book metadata.
pub async fn update_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<BookUpdate>,
) -> Result<Json<Book>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let mut book = owned_book(&state, &user.id, &id)?;

    book.apply_update(update).map_err(AppError::InvalidFormat)?;
    state.db.save_book(&book)?;
    Ok(Json(book))
}

/// Delete a book, its annotations and its files.
pub async fn delete_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &id)?;

    state.db.delete_book(&user.id, &book.id)?;
    // the row is gone; a leftover file is only logged
    if let Err(e) = state
        .storage
        .delete_book_files(&book.storage_key, &book.id)
        .await
    {
        tracing::warn!(book_id = %book.id, error = %e, "Failed to remove book files");
    }

    tracing::info!(user_id = %user.id, book_id = %book.id, "Deleted book");
    Ok(StatusCode::NO_CONTENT)
}

/// Record reading progress.
pub async fn update_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<Book>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let mut book = owned_book(&state, &user.id, &id)?;

    if update.percentage.is_some_and(|p| !p.is_finite()) {
        return Err(AppError::InvalidFormat(
            "Percentage must be a number".to_string(),
        ));
    }

    book.record_progress(&update, Utc::now());
    state.db.save_book(&book)?;
    Ok(Json(book))
}

/// Cover query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct CoverQuery {
    /// Return a thumbnail instead of the full cover.
    #[serde(default)]
    thumbnail: bool,
}

/// Book cover image (PNG).
pub async fn book_cover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<CoverQuery>,
) -> Result<Response<Body>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &id)?;

    let mut data = state.get_cover(&book).await?;
    if query.thumbnail {
        data = cover::thumbnail(&data, state.config.cache.thumbnail_size)?;
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "private, max-age=86400")
        .body(Body::from(data))
        .unwrap_or_else(|_| Response::default()))
}

/// Signed download link.
#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    url: String,
    expires_at: i64,
}

/// Issue a time-limited download link.
pub async fn download_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DownloadUrlResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &id)?;

    let link = state.auth.issue_download_link(
        &user.id,
        &book.id,
        state.config.storage.download_link_minutes,
    )?;

    Ok(Json(DownloadUrlResponse {
        url: format!("{}/api/files/{}", state.base_url(), link.token),
        expires_at: link.expires_at,
    }))
}

/// Stream a book file for a valid download link.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response<Body>> {
    let link = state.auth.redeem_download_link(&token)?;
    let book = owned_book(&state, &link.user_id, &link.book_id)?;

    let file = tokio::fs::File::open(state.storage.book_path(&book.storage_key)).await?;
    let length = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, book.format.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&book.original_filename),
        )
        .header(header::CONTENT_LENGTH, length)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// `attachment` header with an ASCII fallback and the UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

// ============================================================================
// UPLOAD
// ============================================================================

/// Upload a book file (multipart field `file`).
pub async fn upload_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Book>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let max_bytes = state.config.storage.max_upload_bytes();

    let mut upload: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::InvalidFormat("Upload has no file name".to_string()))?;
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::InvalidFormat("Missing 'file' field".to_string()))?;

    if data.is_empty() {
        return Err(AppError::InvalidFormat("Uploaded file is empty".to_string()));
    }
    if data.len() > max_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "File exceeds {} MB",
            state.config.storage.max_upload_mb
        )));
    }

    let format = formats::detect_format(&filename, &data[..data.len().min(8)])?;
    let key = state.storage.save_book(format, &data).await?;

    let mut book = Book::new(&user.id, format, key, &filename);
    book.file_size = data.len() as u64;

    let path = state.storage.book_path(&book.storage_key);
    let extracted = tokio::task::spawn_blocking(move || {
        formats::get_handler(format).extract_metadata(&path)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Metadata task failed: {}", e)))
    .and_then(|extracted| extracted);

    match extracted {
        Ok(extracted) => book.apply_extracted(extracted),
        Err(e) => {
            // a file that cannot be parsed is not a book
            discard_upload(&state, &book).await;
            return Err(e);
        }
    }

    book.has_cover = state.cache_cover(&book).await;

    if let Err(e) = state.db.save_book(&book) {
        discard_upload(&state, &book).await;
        return Err(e);
    }

    tracing::info!(
        user_id = %user.id,
        book_id = %book.id,
        format = %book.format,
        bytes = book.file_size,
        "Uploaded book"
    );
    Ok((StatusCode::CREATED, Json(book)))
}

/// Remove the files of an upload that was not saved.
async fn discard_upload(state: &AppState, book: &Book) {
    if let Err(e) = state
        .storage
        .delete_book_files(&book.storage_key, &book.id)
        .await
    {
        tracing::warn!(
            book_id = %book.id,
            key = %book.storage_key,
            error = %e,
            "Failed to remove rejected upload"
        );
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::InvalidFormat(e.body_text())
    }
}

// ============================================================================
// BOOKMARKS
// ============================================================================

/// Query selecting one book's annotations.
#[derive(Debug, Deserialize)]
pub struct BookQuery {
    book_id: String,
}

/// Bookmark creation request.
#[derive(Debug, Deserialize)]
pub struct CreateBookmarkRequest {
    book_id: String,
    location: Location,
    note: Option<String>,
}

/// List a book's bookmarks.
pub async fn list_bookmarks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BookQuery>,
) -> Result<Json<Vec<Bookmark>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &query.book_id)?;
    Ok(Json(state.db.get_bookmarks(&user.id, &book.id)?))
}

/// Add a bookmark.
pub async fn create_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBookmarkRequest>,
) -> Result<(StatusCode, Json<Bookmark>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &req.book_id)?;

    req.location
        .validate_for(book.format)
        .map_err(AppError::InvalidFormat)?;

    let now = Utc::now();
    let bookmark = Bookmark {
        id: uuid::Uuid::new_v4().to_string(),
        book_id: book.id,
        user_id: user.id,
        location: req.location,
        note: req
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        created_at: now,
        updated_at: now,
    };

    state.db.save_bookmark(&bookmark)?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

/// Edit a bookmark's location or note.
pub async fn update_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<BookmarkPatch>,
) -> Result<Json<Bookmark>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let mut bookmark = state
        .db
        .get_bookmark(&user.id, &id)?
        .ok_or_else(|| AppError::NotFound(format!("Bookmark not found: {}", id)))?;

    if let Some(location) = &patch.location {
        let book = owned_book(&state, &user.id, &bookmark.book_id)?;
        location
            .validate_for(book.format)
            .map_err(AppError::InvalidFormat)?;
    }

    bookmark.apply(&patch, Utc::now());
    state.db.save_bookmark(&bookmark)?;
    Ok(Json(bookmark))
}

/// Delete a bookmark.
pub async fn delete_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    if !state.db.delete_bookmark(&id, &user.id)? {
        return Err(AppError::NotFound(format!("Bookmark not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// HIGHLIGHTS
// ============================================================================

/// Highlight creation request.
#[derive(Debug, Deserialize)]
pub struct CreateHighlightRequest {
    book_id: String,
    text: String,
    position: HighlightPosition,
    /// Preset name, or a custom name when `hex` is given.
    color: Option<String>,
    hex: Option<String>,
    note: Option<String>,
}

/// Highlight edit request.
#[derive(Debug, Deserialize)]
pub struct UpdateHighlightRequest {
    text: Option<String>,
    color: Option<String>,
    hex: Option<String>,
    note: Option<String>,
}

fn resolve_color(name: Option<&str>, hex: Option<&str>) -> Result<Option<HighlightColor>> {
    match (name, hex) {
        (None, None) => Ok(None),
        (name, Some(hex)) => HighlightColor::new(name.unwrap_or("custom"), hex)
            .map(Some)
            .map_err(AppError::InvalidFormat),
        (Some(name), None) => HighlightColor::preset(name)
            .map(Some)
            .ok_or_else(|| AppError::InvalidFormat(format!("Unknown color: {}", name))),
    }
}

fn validate_highlight_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidFormat(
            "Highlight text cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// List a book's highlights, top to bottom.
pub async fn list_highlights(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BookQuery>,
) -> Result<Json<Vec<Highlight>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &query.book_id)?;
    Ok(Json(state.db.get_highlights(&user.id, &book.id)?))
}

/// Add a highlight.
pub async fn create_highlight(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateHighlightRequest>,
) -> Result<(StatusCode, Json<Highlight>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = owned_book(&state, &user.id, &req.book_id)?;

    validate_highlight_text(&req.text)?;
    req.position
        .validate_for(book.format)
        .map_err(AppError::InvalidFormat)?;
    let color = resolve_color(req.color.as_deref(), req.hex.as_deref())?.unwrap_or_default();

    let now = Utc::now();
    let highlight = Highlight {
        id: uuid::Uuid::new_v4().to_string(),
        book_id: book.id,
        user_id: user.id,
        text: req.text,
        color,
        note: req
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        position: req.position,
        created_at: now,
        updated_at: now,
    };

    state.db.save_highlight(&highlight)?;
    Ok((StatusCode::CREATED, Json(highlight)))
}

/// Edit a highlight's text, color or note.
pub async fn update_highlight(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateHighlightRequest>,
) -> Result<Json<Highlight>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let mut highlight = state
        .db
        .get_highlight(&user.id, &id)?
        .ok_or_else(|| AppError::NotFound(format!("Highlight not found: {}", id)))?;

    if let Some(text) = &req.text {
        validate_highlight_text(text)?;
    }
    let patch = HighlightPatch {
        text: req.text,
        color: resolve_color(req.color.as_deref(), req.hex.as_deref())?,
        note: req.note,
    };

    highlight.apply(&patch, Utc::now());
    state.db.save_highlight(&highlight)?;
    Ok(Json(highlight))
}

/// Delete a highlight.
pub async fn delete_highlight(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    if !state.db.delete_highlight(&id, &user.id)? {
        return Err(AppError::NotFound(format!("Highlight not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Collection name request (create and rename).
#[derive(Debug, Deserialize)]
pub struct CollectionNameRequest {
    name: String,
}

/// Collection membership request.
#[derive(Debug, Deserialize)]
pub struct CollectionBookRequest {
    book_id: String,
}

fn validate_collection_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_COLLECTION_NAME {
        return Err(AppError::InvalidFormat(format!(
            "Collection name must be 1-{} characters",
            MAX_COLLECTION_NAME
        )));
    }
    Ok(name.to_string())
}

fn owned_collection(state: &AppState, user_id: &str, id: &str) -> Result<Collection> {
    state
        .db
        .get_collection(user_id, id)?
        .ok_or_else(|| AppError::NotFound(format!("Collection not found: {}", id)))
}

/// List the user's collections, default first.
pub async fn list_collections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Collection>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.list_collections(&user.id)?))
}

/// Create a collection.
pub async fn create_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CollectionNameRequest>,
) -> Result<(StatusCode, Json<Collection>)> {
    let user = get_authenticated_user(&state, &headers).await?;

    let collection = Collection {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id,
        name: validate_collection_name(&req.name)?,
        book_ids: Vec::new(),
        is_default: false,
        created_at: Utc::now(),
    };

    state.db.create_collection(&collection)?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// Rename a collection.
pub async fn rename_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CollectionNameRequest>,
) -> Result<Json<Collection>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let collection = owned_collection(&state, &user.id, &id)?;
    if collection.is_default {
        return Err(AppError::Forbidden(
            "The default collection cannot be renamed".to_string(),
        ));
    }

    let name = validate_collection_name(&req.name)?;
    state.db.rename_collection(&user.id, &id, &name)?;
    Ok(Json(owned_collection(&state, &user.id, &id)?))
}

/// Delete a collection. Its books are kept.
pub async fn delete_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    let collection = owned_collection(&state, &user.id, &id)?;
    if collection.is_default {
        return Err(AppError::Forbidden(
            "The default collection cannot be deleted".to_string(),
        ));
    }

    state.db.delete_collection(&user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a book to a collection. Adding it twice is a no-op.
pub async fn add_collection_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CollectionBookRequest>,
) -> Result<Json<Collection>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let collection = owned_collection(&state, &user.id, &id)?;
    let book = owned_book(&state, &user.id, &req.book_id)?;

    state.db.add_book_to_collection(&collection.id, &book.id)?;
    Ok(Json(owned_collection(&state, &user.id, &id)?))
}

/// Remove a book from a collection.
pub async fn remove_collection_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, book_id)): Path<(String, String)>,
) -> Result<Json<Collection>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let collection = owned_collection(&state, &user.id, &id)?;

    if !state.db.remove_book_from_collection(&collection.id, &book_id)? {
        return Err(AppError::NotFound(format!(
            "Book {} is not in collection {}",
            book_id, id
        )));
    }
    Ok(Json(owned_collection(&state, &user.id, &id)?))
}

// ============================================================================
// ANALYTICS
// ============================================================================

/// Session list filter.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    book_id: Option<String>,
}

/// Summary parameters.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    days: Option<u32>,
}

/// Goal edit request.
#[derive(Debug, Deserialize)]
pub struct GoalUpdateRequest {
    target: i64,
}

/// List logged reading sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<ReadingSession>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(
        state.analytics.sessions(&user.id, query.book_id.as_deref())?,
    ))
}

/// Log a finished reading session.
pub async fn log_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewSession>,
) -> Result<(StatusCode, Json<ReadingSession>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let session = state.analytics.log_session(&user.id, req)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Reading overview.
pub async fn analytics_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Summary>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let days = query.days.unwrap_or(DEFAULT_SUMMARY_DAYS);
    Ok(Json(state.analytics.summary(&user.id, days, Utc::now())?))
}

/// List goals with progress for the current period.
pub async fn list_goals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReadingGoal>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.analytics.goals(&user.id, Utc::now())?))
}

/// Create a goal.
pub async fn create_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewGoal>,
) -> Result<(StatusCode, Json<ReadingGoal>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let goal = state.analytics.create_goal(&user.id, req)?;
    Ok((StatusCode::CREATED, Json(goal)))
}

/// Change a goal's target.
pub async fn update_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<GoalUpdateRequest>,
) -> Result<Json<ReadingGoal>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.analytics.update_goal(&user.id, &id, req.target)?))
}

/// Delete a goal.
pub async fn delete_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.analytics.delete_goal(&user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// HEALTH
// ============================================================================

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state.auth.authenticate(&token)
}

/// One of the user's books.
fn owned_book(state: &AppState, user_id: &str, id: &str) -> Result<Book> {
    state
        .db
        .get_book(user_id, id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Dune.epub"),
            "attachment; filename=\"Dune.epub\"; filename*=UTF-8''Dune.epub"
        );
        assert_eq!(
            content_disposition("Les Misérables.pdf"),
            "attachment; filename=\"Les Mis_rables.pdf\"; filename*=UTF-8''Les%20Mis%C3%A9rables.pdf"
        );
    }

    #[test]
    fn test_resolve_color() {
        assert_eq!(resolve_color(None, None).unwrap(), None);
        assert_eq!(
            resolve_color(Some("green"), None).unwrap(),
            HighlightColor::preset("green")
        );
        assert_eq!(
            resolve_color(Some("mint"), Some("#AAFFCC")).unwrap().unwrap().hex,
            "#aaffcc"
        );
        assert!(resolve_color(Some("mauve"), None).is_err());
        assert!(resolve_color(None, Some("nope")).is_err());
    }
}
