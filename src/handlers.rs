use crate::auth::{request_id_from_headers, require_admin};
use crate::error::{validation_details, AppError};
use crate::import::{read_upload, run_import, ImportReport, ImportRow};
use crate::models::{validate_draft, validate_subject_name, Question, QuestionDraft, QuestionPatch, Slot, Subject, ValidationIssue};
use crate::quiz::{score_deck, PreparedQuestion, QuizSession, QuizSize, QuizSummary, RevealPolicy};
use crate::state::AppState;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SubjectPayload {
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub name: String,
}

fn subject_name(payload: &SubjectPayload, req_id: &str) -> Result<String, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "invalid subject", req_id)
            .with_details(validation_details(&errors)));
    }
    validate_subject_name(&payload.name)
        .map_err(|issue| AppError::validation("Field \"name\" is required.", vec![issue], req_id))
}

pub async fn list_subjects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Subject>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let subjects = state
        .store
        .list_subjects()
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(subjects))
}

pub async fn create_subject(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SubjectPayload>,
) -> Result<(StatusCode, Json<Subject>), AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    let name = subject_name(&payload, &req_id)?;
    let subject = state
        .store
        .create_subject(&name)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    info!(subject_id = subject.id, "subject created");
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn rename_subject(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
    Json(payload): Json<SubjectPayload>,
) -> Result<Json<Subject>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    let name = subject_name(&payload, &req_id)?;
    let subject = state
        .store
        .rename_subject(id, &name)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(subject))
}

pub async fn delete_subject(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    state
        .store
        .delete_subject(id)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    info!(subject_id = id, "subject deleted with its questions");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionQuery {
    pub subject_id: Option<String>,
}

fn parse_id(raw: Option<&str>, field: &str, req_id: &str) -> Result<i64, AppError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("{field} is required"),
            req_id,
        ));
    }
    raw.parse().map_err(|_| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("{field} must be an integer id"),
            req_id,
        )
    })
}

pub async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QuestionQuery>,
) -> Result<Json<Vec<Question>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let subject_id = parse_id(query.subject_id.as_deref(), "subjectId", &req_id)?;
    let questions = state
        .store
        .list_questions(subject_id)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(questions))
}

pub async fn get_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Question>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let question = state
        .store
        .get_question(id)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(question))
}

fn default_correct() -> String {
    "A".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionPayload {
    pub subject_id: i64,
    pub text: String,
    pub choice_a: String,
    pub choice_b: String,
    #[serde(default)]
    pub choice_c: Option<String>,
    #[serde(default)]
    pub choice_d: Option<String>,
    #[serde(default = "default_correct")]
    pub correct: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CreateQuestionPayload {
    fn into_draft(self) -> Result<QuestionDraft, Vec<ValidationIssue>> {
        let correct = Slot::parse(&self.correct).ok_or_else(|| {
            vec![ValidationIssue {
                field: "correct".into(),
                issue: "must be one of A, B, C, D".into(),
            }]
        })?;
        let draft = QuestionDraft {
            subject_id: self.subject_id,
            text: self.text,
            choice_a: self.choice_a,
            choice_b: self.choice_b,
            choice_c: self.choice_c,
            choice_d: self.choice_d,
            correct,
            comment: self.comment,
        }
        .normalized();
        validate_draft(&draft)?;
        Ok(draft)
    }
}

pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<CreateQuestionPayload>,
) -> Result<(StatusCode, Json<Question>), AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    let draft = payload
        .into_draft()
        .map_err(|issues| AppError::validation("question validation failed", issues, req_id.clone()))?;
    let question = state
        .store
        .create_question(draft)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
    Json(patch): Json<QuestionPatch>,
) -> Result<Json<Question>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    let current = state
        .store
        .get_question(id)
        .await
        .map_err(|e| AppError::from_store(e, req_id.clone()))?;
    let updated = patch
        .apply(&current)
        .map_err(|issues| AppError::validation("question validation failed", issues, req_id.clone()))?;
    let saved = state
        .store
        .update_question(updated)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(saved))
}

pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    state
        .store
        .delete_question(id)
        .await
        .map_err(|e| AppError::from_store(e, req_id))?;
    Ok(Json(json!({ "ok": true })))
}

/// Multipart upload with `subjectId` and `file` fields.
pub async fn import_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;

    let bad_form = |e: axum::extract::multipart::MultipartError| {
        AppError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", format!("invalid form data: {e}"), req_id.clone())
    };
    let mut subject_raw: Option<String> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "subjectId" => subject_raw = Some(field.text().await.map_err(bad_form)?),
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                upload = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let subject_id = parse_id(subject_raw.as_deref(), "subjectId", &req_id)?;
    let (file_name, bytes) = upload.ok_or_else(|| {
        AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Missing file.", req_id.clone())
    })?;

    // Spreadsheet decoding is CPU-bound.
    let rows = tokio::task::spawn_blocking(move || read_upload(&file_name, bytes))
        .await
        .map_err(|e| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                format!("import worker failed: {e}"),
                req_id.clone(),
            )
        })?
        .map_err(|e| AppError::from_import(e, req_id.clone()))?;

    let report = run_import(state.store.as_ref(), subject_id, &rows)
        .await
        .map_err(|e| AppError::from_import(e, req_id))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowsPayload {
    pub subject_id: i64,
    pub rows: Vec<Vec<Value>>,
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Same pipeline as the upload, for clients that already parsed the sheet.
pub async fn import_rows(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<ImportRowsPayload>,
) -> Result<Json<ImportReport>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, &jar, &state).await?;
    let grid = payload
        .rows
        .iter()
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();
    let rows = ImportRow::from_grid(grid);
    let report = run_import(state.store.as_ref(), payload.subject_id, &rows)
        .await
        .map_err(|e| AppError::from_import(e, req_id))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildQuizPayload {
    pub subject_id: i64,
    pub size: QuizSize,
    #[serde(alias = "revealPolicy")]
    pub reveal: RevealPolicy,
}

/// Returns a fresh session for the learner to hold; nothing is stored.
pub async fn build_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BuildQuizPayload>,
) -> Result<Json<QuizSession>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .store
        .get_subject(payload.subject_id)
        .await
        .map_err(|e| AppError::from_store(e, req_id.clone()))?;
    let pool = state
        .store
        .list_questions(payload.subject_id)
        .await
        .map_err(|e| AppError::from_store(e, req_id.clone()))?;
    let session = QuizSession::build(&pool, payload.size, payload.reveal)
        .map_err(|e| AppError::from_quiz(e, req_id))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreQuizPayload {
    #[serde(alias = "revealPolicy")]
    pub reveal: RevealPolicy,
    pub items: Vec<PreparedQuestion>,
}

pub async fn score_quiz(
    headers: HeaderMap,
    Json(payload): Json<ScoreQuizPayload>,
) -> Result<Json<QuizSummary>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let summary = score_deck(payload.reveal, &payload.items).map_err(|e| AppError::from_quiz(e, req_id))?;
    Ok(Json(summary))
}

pub async fn diag(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store = state.store.as_ref();
    let probe = async {
        let version = store.version().await?;
        let subjects = store.list_subjects().await?.len();
        Ok::<_, crate::store::StoreError>((version, subjects))
    };
    match probe.await {
        Ok((version, subjects)) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "backend": store.backend(), "version": version, "subjects": subjects })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "backend": store.backend(), "message": err.to_string() })),
        ),
    }
}
