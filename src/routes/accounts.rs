use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::SqliteConnection;

use crate::{
    error::{validation, AppError, AppResult, OptionExt},
    middleware::CurrentUser,
    state::AppState,
    types::{AccountDto, CreateAccountRequest, Role, UpdateAccountRequest},
};

const ACCOUNT_SELECT: &str = r#"SELECT a.id, a.username, a.role, a.active, r.id AS reader_id, a.created_at
    FROM accounts a LEFT JOIN readers r ON r.account_id = a.id"#;

/// 3-50 characters, letters, digits, `.`, `_` and `-`.
pub(crate) fn validate_username(username: &str) -> AppResult<String> {
    let username = validation::required_text(username, "username", 50)?;
    if username.chars().count() < 3 {
        return Err(AppError::ValidationError {
            field: "username".to_string(),
            message: "Username must be at least 3 characters".to_string(),
        });
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(AppError::ValidationError {
            field: "username".to_string(),
            message: "Only letters, digits, '.', '_' and '-' are allowed".to_string(),
        });
    }
    Ok(username)
}

pub(crate) async fn ensure_username_free(conn: &mut SqliteConnection, username: &str) -> AppResult<()> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE username = ?1")
        .bind(username)
        .fetch_one(&mut *conn)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict(format!("Username '{}' is already taken", username)));
    }
    Ok(())
}

pub(crate) async fn fetch_account(conn: &mut SqliteConnection, id: i64) -> AppResult<AccountDto> {
    let account: Option<AccountDto> = sqlx::query_as(&format!("{} WHERE a.id = ?1", ACCOUNT_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    account.ok_or_not_found("Account")
}

pub async fn list_accounts(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<AccountDto>>> {
    user.require_admin()?;
    let accounts = sqlx::query_as(&format!("{} ORDER BY a.id", ACCOUNT_SELECT)).fetch_all(&state.db).await?;
    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<AccountDto>> {
    user.require_admin()?;
    let mut conn = state.db.acquire().await?;
    Ok(Json(fetch_account(&mut conn, id).await?))
}

pub async fn create_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateAccountRequest>,
) -> AppResult<(StatusCode, Json<AccountDto>)> {
    user.require_admin()?;
    let username = validate_username(&req.username)?;
    validation::validate_password(&req.password)?;
    let hash = crate::auth::hash_password(&req.password, state.config.auth.bcrypt_cost).await?;

    let mut tx = crate::db::begin_write(&state.db).await?;
    ensure_username_free(&mut tx, &username).await?;
    let id = sqlx::query(
        "INSERT INTO accounts (username, password_hash, role, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
    )
    .bind(&username)
    .bind(hash)
    .bind(req.role)
    .bind(chrono::Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    let account = fetch_account(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(account_id = id, role = req.role.as_str(), "Account '{}' created by {}", username, user.username);
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn update_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAccountRequest>,
) -> AppResult<Json<AccountDto>> {
    user.require_admin()?;
    if id == user.account_id {
        if req.active == Some(false) {
            return Err(AppError::BadRequest("You cannot deactivate your own account".to_string()));
        }
        if req.role.is_some_and(|r| r != Role::Admin) {
            return Err(AppError::BadRequest("You cannot remove your own Admin role".to_string()));
        }
    }

    let hash = match req.password.as_deref() {
        Some(pw) => {
            validation::validate_password(pw)?;
            Some(crate::auth::hash_password(pw, state.config.auth.bcrypt_cost).await?)
        }
        None => None,
    };

    let mut tx = crate::db::begin_write(&state.db).await?;
    fetch_account(&mut tx, id).await?;
    sqlx::query(
        r#"UPDATE accounts
           SET role = COALESCE(?1, role),
               active = COALESCE(?2, active),
               password_hash = COALESCE(?3, password_hash)
           WHERE id = ?4"#,
    )
    .bind(req.role)
    .bind(req.active)
    .bind(hash)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let account = fetch_account(&mut tx, id).await?;
    tx.commit().await?;
    Ok(Json(account))
}

/// The reader profile of a deleted account stays; its `account_id` becomes NULL.
pub async fn delete_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if id == user.account_id {
        return Err(AppError::BadRequest("You cannot delete your own account".to_string()));
    }
    let res = sqlx::query("DELETE FROM accounts WHERE id = ?1").bind(id).execute(&state.db).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Account not found".to_string()));
    }
    tracing::info!(account_id = id, "Account deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}
