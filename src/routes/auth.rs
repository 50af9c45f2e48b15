use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};

use super::accounts::{ensure_username_free, fetch_account, validate_username};
use crate::{
    auth::{hash_password, verify_password},
    error::{validation, AppError, AppResult},
    middleware::{ip::ClientIp, CurrentUser},
    state::AppState,
    types::{AccountDto, ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, Role},
};

/// Library cards issued at self-registration are valid for one year.
const CARD_VALIDITY_DAYS: i64 = 365;

fn token_for(state: &AppState, account: AccountDto) -> AppResult<LoginResponse> {
    let (token, expires_at) = state.keys.issue(
        account.id,
        &account.username,
        account.role,
        account.reader_id,
        state.config.auth.token_ttl_hours,
        Utc::now(),
    )?;
    Ok(LoginResponse { token, expires_at, account })
}

pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    state.rate_limiter.check_endpoint_limit("/api/auth/login", ip).await?;

    let row: Option<(i64, String, bool)> =
        sqlx::query_as("SELECT id, password_hash, active FROM accounts WHERE username = ?1")
            .bind(req.username.trim())
            .fetch_optional(&state.db)
            .await?;

    // same message for unknown user and wrong password
    let invalid = || AppError::Unauthorized("Invalid username or password".to_string());
    let (id, hash, active) = row.ok_or_else(invalid)?;
    if !verify_password(&req.password, &hash).await? {
        tracing::warn!("Failed login for '{}'", crate::middleware::validation::sanitize_for_logging(&req.username));
        return Err(invalid());
    }
    if !active {
        return Err(AppError::Unauthorized("Account is disabled".to_string()));
    }

    let mut conn = state.db.acquire().await?;
    let account = fetch_account(&mut conn, id).await?;
    drop(conn);
    Ok(Json(token_for(&state, account)?))
}

/// Self-service sign-up: a DocGia account plus its reader profile.
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<LoginResponse>)> {
    state.rate_limiter.check_endpoint_limit("/api/auth/register", ip).await?;

    let username = validate_username(&req.username)?;
    validation::validate_password(&req.password)?;
    let full_name = validation::required_text(&req.full_name, "full_name", 150)?;
    validation::validate_email(req.email.as_deref())?;
    let email = validation::optional_text(req.email.as_deref(), "email", 150)?;
    let phone = validation::optional_text(req.phone.as_deref(), "phone", 30)?;
    let address = validation::optional_text(req.address.as_deref(), "address", 300)?;

    let hash = hash_password(&req.password, state.config.auth.bcrypt_cost).await?;
    let now = Utc::now();

    let mut tx = crate::db::begin_write(&state.db).await?;
    ensure_username_free(&mut tx, &username).await?;
    let account_id = sqlx::query(
        "INSERT INTO accounts (username, password_hash, role, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
    )
    .bind(&username)
    .bind(hash)
    .bind(Role::Reader)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    sqlx::query(
        r#"INSERT INTO readers (account_id, full_name, email, phone, address, card_expires_on, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
    )
    .bind(account_id)
    .bind(&full_name)
    .bind(&email)
    .bind(&phone)
    .bind(&address)
    .bind(crate::today() + Duration::days(CARD_VALIDITY_DAYS))
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let account = fetch_account(&mut tx, account_id).await?;
    tx.commit().await?;

    tracing::info!(account_id, "Reader '{}' registered", username);
    Ok((StatusCode::CREATED, Json(token_for(&state, account)?)))
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<AccountDto>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(fetch_account(&mut conn, user.account_id).await?))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    validation::validate_password(&req.new_password)?;

    let hash: String = sqlx::query_scalar("SELECT password_hash FROM accounts WHERE id = ?1")
        .bind(user.account_id)
        .fetch_one(&state.db)
        .await?;
    if !verify_password(&req.current_password, &hash).await? {
        return Err(AppError::BadRequest("Current password is incorrect".to_string()));
    }

    let new_hash = hash_password(&req.new_password, state.config.auth.bcrypt_cost).await?;
    sqlx::query("UPDATE accounts SET password_hash = ?1 WHERE id = ?2")
        .bind(new_hash)
        .bind(user.account_id)
        .execute(&state.db)
        .await?;
    tracing::info!(account_id = user.account_id, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}
