//! JSON HTTP API: sessions, attendance, face gallery and account CRUD.

use crate::accounts::{Account, AccountError, AccountStore, Role};
use crate::auth::{AdminContext, AuthContext, SessionStore};
use crate::engine::{EngineError, EngineHandle};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{Local, NaiveDate};
use rollcall_core::recognizer::RecognizeError;
use rollcall_core::{FaceStore, IdentityKey, Ledger, MarkOutcome, TrainOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub struct AppState {
    pub accounts: AccountStore,
    pub sessions: SessionStore,
    pub engine: EngineHandle,
    pub ledger: Ledger,
    pub face_store: FaceStore,
    pub max_samples: usize,
}

/// Error taxonomy for the API. Every variant maps to a status code and a
/// stable machine-readable `error` tag.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden,
    NotFound(String),
    Validation(String),
    Device(String),
    ModelUnavailable,
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone())
            }
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "admin access required".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg.clone()),
            ApiError::Device(msg) => (StatusCode::SERVICE_UNAVAILABLE, "device", msg.clone()),
            ApiError::ModelUnavailable => (
                StatusCode::CONFLICT,
                "model_unavailable",
                "no trained model yet, enroll a face first".to_string(),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, tag, message) = self.parts();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = message, "request failed");
        }
        (status, Json(json!({ "error": tag, "message": message }))).into_response()
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(id) => ApiError::NotFound(format!("no account with id {id}")),
            AccountError::DuplicateUsername(_)
            | AccountError::MissingField
            | AccountError::SelfDeletion
            | AccountError::LastAdmin
            | AccountError::UnknownRole(_) => ApiError::Validation(err.to_string()),
            AccountError::Hash(_) | AccountError::Db(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Camera(e) => ApiError::Device(e.to_string()),
            EngineError::Recognize(RecognizeError::ModelUnavailable) => ApiError::ModelUnavailable,
            EngineError::Recognize(RecognizeError::NoFaceRecognized) => {
                ApiError::NotFound("no face recognized".to_string())
            }
            EngineError::Recognize(RecognizeError::Frame(e)) => ApiError::Device(e.to_string()),
            EngineError::FaceStore(rollcall_core::face_store::FaceStoreError::IdentityNotFound(
                key,
            )) => ApiError::NotFound(format!("no face data for {key}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/mark", post(mark))
        .route("/api/ledger/today", get(ledger_today))
        .route("/api/ledger", get(ledger_day))
        .route("/api/ledger/export", get(ledger_export))
        .route("/api/history", get(history))
        .route("/api/faces", get(list_faces).post(register_face))
        .route("/api/faces/:identity", delete(remove_face))
        .route("/api/faces/:identity/archive", get(face_archive))
        .route("/api/retrain", post(retrain))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:id", put(update_user).delete(delete_user))
        .route("/api/users/:id/password", put(reset_password))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---- sessions ----

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: Uuid,
    account: Account,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let account = state
        .accounts
        .verify_login(&req.username, &req.password)?
        .ok_or_else(|| ApiError::Unauthorized("invalid username or password".into()))?;

    let token = state.sessions.issue(AuthContext {
        account_id: account.id,
        username: account.username.clone(),
        role: account.role,
    });
    tracing::info!(username = %account.username, "login");
    Ok(Json(LoginResponse { token, account }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    headers: axum::http::HeaderMap,
) -> StatusCode {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| Uuid::parse_str(t.trim()).ok())
    {
        state.sessions.revoke(&token);
    }
    tracing::info!(username = %ctx.username, "logout");
    StatusCode::NO_CONTENT
}

// ---- attendance ----

#[derive(Serialize)]
struct MarkResponse {
    identity: String,
    outcome: &'static str,
    distance: f32,
}

/// Public kiosk endpoint. No session required: the camera itself is the
/// credential here.
async fn mark(State(state): State<Arc<AppState>>) -> Result<Json<MarkResponse>, ApiError> {
    let recognition = state.engine.mark().await?;
    let outcome = match recognition.outcome {
        MarkOutcome::Marked => "marked",
        MarkOutcome::AlreadyMarked => "already_marked",
    };
    Ok(Json(MarkResponse {
        identity: recognition.identity.to_string(),
        outcome,
        distance: recognition.distance,
    }))
}

async fn ledger_today(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let today = Local::now().date_naive();
    let records = state
        .ledger
        .read_day(today)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({
        "date": today.to_string(),
        "records": records,
    })))
}

#[derive(Deserialize)]
struct DateQuery {
    date: NaiveDate,
}

async fn ledger_day(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Query(q): Query<DateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.ledger.day_exists(q.date) {
        return Err(ApiError::NotFound(format!("no ledger for {}", q.date)));
    }
    let records = state
        .ledger
        .read_day(q.date)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let counts = state
        .ledger
        .day_counts(q.date)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({
        "date": q.date.to_string(),
        "records": records,
        "counts": counts.into_iter()
            .map(|(name, count)| json!({ "name": name, "count": count }))
            .collect::<Vec<_>>(),
    })))
}

/// Raw CSV download of one day's ledger file.
async fn ledger_export(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Query(q): Query<DateQuery>,
) -> Result<Response, ApiError> {
    let path = state.ledger.day_path(q.date);
    if !path.exists() {
        return Err(ApiError::NotFound(format!("no ledger for {}", q.date)));
    }
    let body =
        std::fs::read_to_string(&path).map_err(|e| ApiError::Internal(e.to_string()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attendance.csv".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// The calling account's own attendance across all days. Admins manage the
/// ledger through the admin routes instead.
async fn history(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    if ctx.role == Role::Admin {
        return Err(ApiError::Forbidden);
    }
    let records = state
        .ledger
        .history(&ctx.username)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({
        "username": ctx.username,
        "records": records.into_iter()
            .map(|(date, r)| json!({ "date": date.to_string(), "record": r }))
            .collect::<Vec<_>>(),
    })))
}

// ---- face gallery ----

#[derive(Serialize)]
struct GalleryEntry {
    identity: String,
    name: String,
    roll: String,
    samples: usize,
}

async fn list_faces(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
) -> Result<Json<Vec<GalleryEntry>>, ApiError> {
    let identities = state
        .face_store
        .list_identities()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut gallery = Vec::with_capacity(identities.len());
    for identity in identities {
        let samples = state
            .face_store
            .sample_count(&identity)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        gallery.push(GalleryEntry {
            identity: identity.to_string(),
            name: identity.name().to_string(),
            roll: identity.roll().to_string(),
            samples,
        });
    }
    Ok(Json(gallery))
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    roll: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    identity: String,
    saved: usize,
    trained: bool,
}

/// Enroll a face for an existing account: capture a sample session from the
/// camera, then retrain the model.
async fn register_face(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if state
        .accounts
        .find_by_username(&req.username)?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "no account named {:?}",
            req.username
        )));
    }
    if state
        .face_store
        .roll_in_use(&req.roll)
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Err(ApiError::Validation(format!(
            "roll {:?} already enrolled",
            req.roll
        )));
    }
    let identity = IdentityKey::new(&req.username, &req.roll)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let outcome = state
        .engine
        .register(identity, state.max_samples)
        .await?;
    Ok(Json(RegisterResponse {
        identity: outcome.identity.to_string(),
        saved: outcome.saved,
        trained: matches!(outcome.training, TrainOutcome::Trained { .. }),
    }))
}

/// Zip download of an identity's stored samples.
async fn face_archive(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Path(identity): Path<String>,
) -> Result<Response, ApiError> {
    let identity =
        IdentityKey::parse(&identity).map_err(|e| ApiError::Validation(e.to_string()))?;
    let paths = state.face_store.sample_paths(&identity).map_err(|e| match e {
        rollcall_core::face_store::FaceStoreError::IdentityNotFound(key) => {
            ApiError::NotFound(format!("no face data for {key}"))
        }
        other => ApiError::Internal(other.to_string()),
    })?;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for path in &paths {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sample.jpg");
        writer
            .start_file(format!("{identity}/{file_name}"), options)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let bytes = std::fs::read(path).map_err(|e| ApiError::Internal(e.to_string()))?;
        std::io::Write::write_all(&mut writer, &bytes)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{identity}.zip\""),
            ),
        ],
        cursor.into_inner(),
    )
        .into_response())
}

/// Force a full rebuild of the model from the current face store, without
/// touching any samples. Useful after manual edits to the store on disk.
async fn retrain(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.engine.retrain().await? {
        TrainOutcome::Trained {
            identities,
            samples,
        } => Ok(Json(json!({
            "trained": true,
            "identities": identities,
            "samples": samples,
        }))),
        TrainOutcome::NoSamples => Ok(Json(json!({ "trained": false }))),
    }
}

async fn remove_face(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Path(identity): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity =
        IdentityKey::parse(&identity).map_err(|e| ApiError::Validation(e.to_string()))?;
    state.engine.remove_identity(identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- accounts ----

#[derive(Deserialize)]
struct ListQuery {
    page: Option<usize>,
    q: Option<String>,
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(query) = q.q.as_deref() {
        let accounts = state.accounts.search(query)?;
        return Ok(Json(json!({ "accounts": accounts })));
    }
    let page = q.page.unwrap_or(1).max(1);
    let (accounts, total) = state.accounts.list(page)?;
    let counts = state.accounts.role_counts()?;
    Ok(Json(json!({
        "accounts": accounts,
        "total": total,
        "page": page,
        "counts": counts,
    })))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    role: Role,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = state
        .accounts
        .create(&req.username, &req.password, req.role)?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    username: String,
    role: Role,
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<Account>, ApiError> {
    let account = state.accounts.update(id, &req.username, req.role)?;
    Ok(Json(account))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    password: String,
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    AdminContext(_): AdminContext,
    Path(id): Path<i64>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state.accounts.set_password(id, &req.password)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.accounts.delete(id, &ctx.username)?;
    state.sessions.revoke_account(deleted.id);
    Ok(StatusCode::NO_CONTENT)
}
