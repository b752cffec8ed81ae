//! Server-side sessions
//!
//! A session is a row keyed by a random id; the id travels in the
//! `analog.sid` cookie. Expired rows are treated as absent and removed the
//! first time they are looked up.

use std::time::Duration;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    database::{Database, now, timestamp},
    error::AppError,
    server::AppState,
};

pub const SESSION_COOKIE: &str = "analog.sid";

/// The signed-in caller, resolved from the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    user_id: i64,
    username: String,
    expires_at: String,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, user_id: i64, username: &str) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AppError::Internal(format!("Session lifetime out of range: {e}")))?;
        let expires_at = timestamp(Utc::now() + ttl);

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, username, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(username)
        .bind(&expires_at)
        .execute(self.db.pool())
        .await?;

        debug!(user_id, expires_at = expires_at.as_str(), "Session created");
        Ok(id)
    }

    pub async fn resolve(&self, id: &str) -> Result<Option<AuthContext>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT user_id, username, expires_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) if row.expires_at > now() => Ok(Some(AuthContext {
                user_id: row.user_id,
                username: row.username,
            })),
            Some(_) => {
                self.destroy(id).await?;
                debug!("Expired session pruned");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn destroy(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn prune_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            info!(pruned = result.rows_affected(), "Removed expired sessions");
        }
        Ok(result.rows_affected())
    }
}

/// Value of the session cookie, if the request carries one.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(id: &str, ttl: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        id,
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn expired_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(ctx.clone());
        }

        let id = session_id_from_headers(&parts.headers).ok_or(AppError::Unauthenticated)?;
        let ctx = state
            .accounts
            .sessions()
            .resolve(&id)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

impl OptionalFromRequestParts<AppState> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        match <AuthContext as FromRequestParts<AppState>>::from_request_parts(parts, state).await {
            Ok(ctx) => Ok(Some(ctx)),
            Err(AppError::Unauthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
