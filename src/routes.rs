use crate::auth;
use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::HeaderName::from_static("x-csrf-token"),
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderName::from_static("x-forwarded-for"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/diag", get(handlers::diag))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/whoami", get(auth::whoami))
        .route(
            "/api/v1/subjects",
            get(handlers::list_subjects).post(handlers::create_subject),
        )
        .route(
            "/api/v1/subjects/:id",
            patch(handlers::rename_subject).delete(handlers::delete_subject),
        )
        .route(
            "/api/v1/questions",
            get(handlers::list_questions).post(handlers::create_question),
        )
        .route("/api/v1/questions/import", post(handlers::import_questions))
        .route("/api/v1/questions/import/rows", post(handlers::import_rows))
        .route(
            "/api/v1/questions/:id",
            get(handlers::get_question)
                .patch(handlers::update_question)
                .delete(handlers::delete_question),
        )
        .route("/api/v1/quiz/build", post(handlers::build_quiz))
        .route("/api/v1/quiz/score", post(handlers::score_quiz))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}
