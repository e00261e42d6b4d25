//! HTTP request handlers.
//!
//! Every failure is answered with a JSON `{ "error": ... }` envelope and the
//! status from [`Pdf2CardsError::status`]. Body, query and path extraction
//! go through [`ApiJson`], [`ApiQuery`] and [`ApiPath`] so malformed requests
//! get the same envelope.

use axum::{
    async_trait,
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Multipart, Path, Query, Request, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::AppState;
use crate::db::{self, FlashcardUpdate};
use crate::learning::{self, NewLearningPath};
use crate::error::Pdf2CardsError;
use crate::pipeline::generate::PDF_MIME;
use crate::review;

/// JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Pdf2CardsError> for ApiError {
    fn from(e: Pdf2CardsError) -> Self {
        let status =
            StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", e);
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        Self::new(r.status(), r.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        Self::new(r.status(), r.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(r: PathRejection) -> Self {
        Self::new(r.status(), r.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Extractors ───────────────────────────────────────────────────────────

/// [`Json`] with rejections reported as [`ApiError`].
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// [`Query`] with rejections reported as [`ApiError`].
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// [`Path`] with rejections reported as [`ApiError`].
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ── Documents ────────────────────────────────────────────────────────────

/// `POST /api/files/process`: multipart upload with a `file` field.
pub async fn process_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, content_type, bytes));
    }

    let (filename, content_type, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("File is required"))?;

    let processed = state
        .service
        .upload_and_process(&filename, &content_type, bytes.to_vec())
        .await?;

    info!(
        "Processed '{}': {} flashcards",
        filename, processed.output.stats.total_cards
    );
    Ok(Json(json!({
        "message": "File processed successfully",
        "fileUrl": processed.file_url,
        "documentId": processed.document.id,
    })))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::bad_request("File size exceeds limit");
    }
    ApiError::bad_request(e.body_text())
}

/// `GET /api/files/list`: newest first.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files = state.service.list_documents().await?;
    Ok(Json(json!({ "files": files })))
}

/// `DELETE /api/files/delete` with body `{ "fileId": N }`.
pub async fn delete_file(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let file_id = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| parse_id(v.get("fileId")?))
        .ok_or_else(|| ApiError::bad_request("File ID is required"))?;

    match state.service.delete_document(file_id).await {
        Ok(_) => Ok(Json(json!({ "success": true }))),
        Err(Pdf2CardsError::NotFound { .. }) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "File not found"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Accept ids sent either as JSON numbers or numeric strings.
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `POST /api/files/:id/resume`
pub async fn resume_file(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let output = state.service.resume(id).await?;
    Ok(Json(json!({
        "message": "File processed successfully",
        "stats": output.stats,
    })))
}

// ── Flashcards ───────────────────────────────────────────────────────────

/// `GET /api/flashcards`: all cards in display order.
pub async fn list_flashcards(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let flashcards = db::list_flashcards(state.service.pool()).await?;
    Ok(Json(json!({ "flashcards": flashcards })))
}

#[derive(Debug, Deserialize)]
pub struct FlashcardPatch {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub update: FlashcardUpdate,
}

/// `PATCH /api/flashcards` with body `{ "id": N, ...fields }`.
pub async fn update_flashcard(
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FlashcardPatch>,
) -> ApiResult<Json<Value>> {
    let id = patch
        .id
        .ok_or_else(|| ApiError::bad_request("Flashcard ID is required"))?;
    let flashcard = db::update_flashcard(state.service.pool(), id, &patch.update).await?;
    Ok(Json(json!({ "success": true, "flashcard": flashcard })))
}

#[derive(Debug, Deserialize)]
pub struct FlashcardIdQuery {
    pub id: Option<i64>,
}

/// `DELETE /api/flashcards?id=N`
pub async fn delete_flashcard(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<FlashcardIdQuery>,
) -> ApiResult<Json<Value>> {
    let id = query
        .id
        .ok_or_else(|| ApiError::bad_request("Flashcard ID is required"))?;
    db::delete_flashcard(state.service.pool(), id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

/// `POST /api/flashcards/reorder` with body `{ "ids": [...] }`.
pub async fn reorder_flashcards(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> ApiResult<Json<Value>> {
    db::reorder_flashcards(state.service.pool(), &req.ids).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub correct: bool,
}

/// `POST /api/flashcards/:id/review` with body `{ "correct": bool }`.
pub async fn review_flashcard(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> ApiResult<Json<review::CardProgress>> {
    let progress = review::record_review(state.service.pool(), id, req.correct).await?;
    Ok(Json(progress))
}

// ── Learning paths ───────────────────────────────────────────────────────

/// `GET /api/paths`: every path with its completion, in order.
pub async fn list_paths(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let paths = learning::list_progress(state.service.pool()).await?;
    Ok(Json(json!({ "paths": paths })))
}

/// `POST /api/paths` with body `{ title, description?, difficulty, flashcardIds, prerequisites? }`.
pub async fn create_path(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewLearningPath>,
) -> ApiResult<Json<Value>> {
    let path = learning::create_path(state.service.pool(), &req).await?;
    Ok(Json(json!({ "success": true, "path": path })))
}

/// `GET /api/paths/next`: `{ "path": null }` once everything is completed.
pub async fn next_path(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let path = learning::next_lesson(state.service.pool()).await?;
    Ok(Json(json!({ "path": path })))
}

// ── Objects ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// `GET /objects/*key?expires=..&signature=..`
pub async fn serve_object(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
    ApiQuery(q): ApiQuery<SignedQuery>,
) -> Response {
    let valid = match (q.expires, q.signature.as_deref()) {
        (Some(expires), Some(signature)) => {
            state
                .signer
                .verify(&key, expires, signature, Utc::now().timestamp())
        }
        _ => false,
    };
    if !valid {
        return ApiError::new(StatusCode::FORBIDDEN, "Invalid or expired signature")
            .into_response();
    }

    match state.store.get(&key).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, PDF_MIME)], bytes).into_response(),
        Err(_) => ApiError::new(StatusCode::NOT_FOUND, "File not found").into_response(),
    }
}
