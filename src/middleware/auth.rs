use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::Role;

/// The authenticated caller.
///
/// Extracted from `Authorization: Bearer <jwt>`. The account is re-read from the
/// database so that disabling or deleting an account takes effect immediately,
/// not only when its token expires.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account_id: i64,
    pub username: String,
    pub role: Role,
    pub reader_id: Option<i64>,
}

impl CurrentUser {
    pub fn require_staff(&self) -> AppResult<()> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Staff role required".to_string()))
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin role required".to_string()))
        }
    }

    /// Reader profile id of the caller; staff accounts have none.
    pub fn require_reader(&self) -> AppResult<i64> {
        self.reader_id
            .ok_or_else(|| AppError::Forbidden("This account has no reader profile".to_string()))
    }

    /// Staff may act on any reader, a reader only on themselves.
    pub fn can_access_reader(&self, reader_id: i64) -> bool {
        self.role.is_staff() || self.reader_id == Some(reader_id)
    }
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let claims = state.keys.verify(token)?;

        let row: Option<(String, Role, bool, Option<i64>)> = sqlx::query_as(
            r#"SELECT a.username, a.role, a.active, r.id
               FROM accounts a LEFT JOIN readers r ON r.account_id = a.id
               WHERE a.id = ?1"#,
        )
        .bind(claims.sub)
        .fetch_optional(&state.db)
        .await?;

        match row {
            Some((username, role, true, reader_id)) => Ok(CurrentUser {
                account_id: claims.sub,
                username,
                role,
                reader_id,
            }),
            Some((_, _, false, _)) => Err(AppError::Unauthorized("Account is disabled".to_string())),
            None => Err(AppError::Unauthorized("Account no longer exists".to_string())),
        }
    }
}
