use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    circulation::loans,
    error::{validation, AppError, AppResult, OptionExt},
    middleware::CurrentUser,
    state::AppState,
    types::{Page, PageQuery, ReaderDto, ReaderInput, SearchQuery, SlipDto},
};

const READER_SELECT: &str = r#"SELECT r.id, r.account_id, r.full_name, r.email, r.phone, r.address, r.card_expires_on,
           (SELECT COUNT(*) FROM borrow_lines l JOIN borrow_slips s ON s.id = l.slip_id
             WHERE s.reader_id = r.id AND l.returned = 0) AS active_loans,
           (SELECT COALESCE(SUM(f.amount), 0) FROM fines f
             WHERE f.reader_id = r.id AND f.status = 'ChuaThanhToan') AS unpaid_fines,
           r.created_at
    FROM readers r"#;

pub(crate) async fn fetch_reader(pool: &SqlitePool, id: i64) -> AppResult<ReaderDto> {
    let reader: Option<ReaderDto> = sqlx::query_as(&format!("{} WHERE r.id = ?1", READER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    reader.ok_or_not_found("Reader")
}

struct ReaderFields {
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

async fn validate_reader(pool: &SqlitePool, input: &ReaderInput) -> AppResult<ReaderFields> {
    validation::validate_email(input.email.as_deref())?;
    if let Some(account_id) = input.account_id {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE id = ?1")
            .bind(account_id)
            .fetch_one(pool)
            .await?;
        if exists == 0 {
            return Err(AppError::BadRequest(format!("Account {} does not exist", account_id)));
        }
    }
    Ok(ReaderFields {
        full_name: validation::required_text(&input.full_name, "full_name", 150)?,
        email: validation::optional_text(input.email.as_deref(), "email", 150)?,
        phone: validation::optional_text(input.phone.as_deref(), "phone", 30)?,
        address: validation::optional_text(input.address.as_deref(), "address", 300)?,
    })
}

fn push_search<'a>(qb: &mut QueryBuilder<'a, Sqlite>, q: &SearchQuery) {
    if let Some(term) = q.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", term);
        qb.push(" WHERE (r.full_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR r.email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR r.phone LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list_readers(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Page<ReaderDto>>> {
    user.require_staff()?;
    let (page, page_size, offset) = PageQuery { page: q.page, page_size: q.page_size }.resolve();

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM readers r");
    push_search(&mut count, &q);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    let mut items = QueryBuilder::<Sqlite>::new(READER_SELECT);
    push_search(&mut items, &q);
    items.push(" ORDER BY r.full_name, r.id LIMIT ").push_bind(page_size);
    items.push(" OFFSET ").push_bind(offset);
    let items: Vec<ReaderDto> = items.build_query_as().fetch_all(&state.db).await?;

    Ok(Json(Page { items, total, page, page_size }))
}

pub async fn get_reader(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ReaderDto>> {
    if !user.can_access_reader(id) {
        return Err(AppError::Forbidden("You may only view your own profile".to_string()));
    }
    Ok(Json(fetch_reader(&state.db, id).await?))
}

pub async fn create_reader(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<ReaderInput>,
) -> AppResult<(StatusCode, Json<ReaderDto>)> {
    user.require_staff()?;
    let f = validate_reader(&state.db, &input).await?;
    let id = sqlx::query(
        r#"INSERT INTO readers (account_id, full_name, email, phone, address, card_expires_on, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
    )
    .bind(input.account_id)
    .bind(&f.full_name)
    .bind(&f.email)
    .bind(&f.phone)
    .bind(&f.address)
    .bind(input.card_expires_on)
    .bind(chrono::Utc::now())
    .execute(&state.db)
    .await?
    .last_insert_rowid();
    tracing::info!(reader_id = id, "Reader '{}' created", f.full_name);
    Ok((StatusCode::CREATED, Json(fetch_reader(&state.db, id).await?)))
}

pub async fn update_reader(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<ReaderInput>,
) -> AppResult<Json<ReaderDto>> {
    user.require_staff()?;
    let f = validate_reader(&state.db, &input).await?;
    let res = sqlx::query(
        r#"UPDATE readers
           SET account_id = ?1, full_name = ?2, email = ?3, phone = ?4, address = ?5, card_expires_on = ?6
           WHERE id = ?7"#,
    )
    .bind(input.account_id)
    .bind(&f.full_name)
    .bind(&f.email)
    .bind(&f.phone)
    .bind(&f.address)
    .bind(input.card_expires_on)
    .bind(id)
    .execute(&state.db)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Reader not found".to_string()));
    }
    Ok(Json(fetch_reader(&state.db, id).await?))
}

/// Refused while the reader holds books or owes money. Readers with closed
/// history are still referenced by their slips; the foreign key turns that into 409.
pub async fn delete_reader(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    let reader = fetch_reader(&state.db, id).await?;
    if reader.active_loans > 0 {
        return Err(AppError::Conflict(format!("Reader still has {} borrowed copies", reader.active_loans)));
    }
    if reader.unpaid_fines > 0 {
        return Err(AppError::Conflict(format!("Reader still owes {} VND in fines", reader.unpaid_fines)));
    }
    let mut tx = crate::db::begin_write(&state.db).await?;
    // open requests and inbox entries go with the reader
    sqlx::query("DELETE FROM borrow_requests WHERE reader_id = ?1 AND status <> 'DaDuyet'")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM readers WHERE id = ?1").bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    tracing::info!(reader_id = id, "Reader deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reader_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<SlipDto>>> {
    if !user.can_access_reader(id) {
        return Err(AppError::Forbidden("You may only view your own history".to_string()));
    }
    fetch_reader(&state.db, id).await?;
    Ok(Json(loans::reader_history(&state.db, id).await?))
}
