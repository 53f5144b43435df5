use crate::error::{validation_details, AppError};
use crate::state::AppState;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use validator::Validate;

pub const SESSION_COOKIE: &str = "admin_session";
pub const CSRF_COOKIE: &str = "csrf_token";
const SESSION_TTL_HOURS: i64 = 12;

static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

pub fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("local")
}

#[derive(Debug, Clone)]
pub struct AdminSession {
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
}

impl AdminSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > ChronoDuration::hours(SESSION_TTL_HOURS)
    }
}

/// The single administrator credential plus its live cookie sessions.
pub struct AdminAuth {
    password_hash: Option<String>,
    sessions: RwLock<HashMap<String, AdminSession>>,
}

impl AdminAuth {
    /// Prefers a stored Argon2 hash; otherwise hashes the plain password once.
    /// With neither, admin login stays disabled.
    pub fn from_config(hash: Option<&str>, plain: Option<&str>) -> anyhow::Result<Self> {
        let password_hash = match (hash, plain) {
            (Some(hash), _) => {
                PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("ADMIN_PASSWORD_HASH is not a valid PHC string: {e}"))?;
                Some(hash.to_string())
            }
            (None, Some(plain)) => Some(hash_password(plain)?),
            (None, None) => {
                warn!("no admin credential configured; admin routes are disabled");
                None
            }
        };
        Ok(Self {
            password_hash,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.password_hash.is_some()
    }

    fn verify(&self, password: &str) -> bool {
        let Some(stored) = self.password_hash.as_deref() else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    }

    async fn open_session(&self) -> (String, String) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let csrf_token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_expired(now));
        sessions.insert(
            session_id.clone(),
            AdminSession {
                csrf_token: csrf_token.clone(),
                created_at: now,
            },
        );
        (session_id, csrf_token)
    }

    async fn session(&self, session_id: &str) -> Option<AdminSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned()
    }

    async fn close_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hash failed: {e}"))?
        .to_string();
    Ok(hash)
}

/// Guards every mutating admin route: a live session cookie and a matching
/// `x-csrf-token` header.
pub async fn require_admin(headers: &HeaderMap, jar: &CookieJar, state: &AppState) -> Result<(), AppError> {
    let req_id = request_id_from_headers(headers);
    let session = match jar.get(SESSION_COOKIE) {
        Some(c) => state.admin.session(c.value()).await,
        None => None,
    }
    .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "admin login required", req_id.clone()))?;

    let header = headers.get("x-csrf-token").and_then(|h| h.to_str().ok());
    if header != Some(session.csrf_token.as_str()) {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginPayload {
    #[validate(length(min = 1, max = 256, message = "must be 1-256 characters"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub admin: bool,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<(CookieJar, Json<WhoAmI>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let ip = client_ip(&headers);
    if !check_rate_limit("admin_login", ip, 30) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    if !state.admin.is_enabled() {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "ADMIN_DISABLED",
            "admin login is not configured",
            req_id,
        ));
    }
    if let Err(errors) = payload.validate() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "invalid login payload",
            req_id,
        )
        .with_details(validation_details(&errors)));
    }
    if !state.admin.verify(&payload.password) {
        warn!(ip, "admin login rejected");
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Invalid password",
            req_id,
        ));
    }

    let (session_id, csrf_token) = state.admin.open_session().await;
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    let csrf_cookie = Cookie::build((CSRF_COOKIE, csrf_token))
        .http_only(false)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    info!(ip, "admin logged in");

    Ok((jar.add(cookie).add(csrf_cookie), Json(WhoAmI { admin: true })))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let req_id = request_id_from_headers(&headers);
    let sid = jar
        .get(SESSION_COOKIE)
        .map(|v| v.value().to_string())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "no session", req_id))?;
    state.admin.close_session(&sid).await;
    let jar = jar
        .remove(Cookie::build(SESSION_COOKIE).path("/"))
        .remove(Cookie::build(CSRF_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn whoami(State(state): State<AppState>, jar: CookieJar) -> Json<WhoAmI> {
    let admin = match jar.get(SESSION_COOKIE) {
        Some(c) => state.admin.session(c.value()).await.is_some(),
        None => false,
    };
    Json(WhoAmI { admin })
}
