//! Borrow requests placed by readers and decided by staff.

use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::loans::{ensure_reader_can_borrow, fetch_slip, open_slip};
use super::CirculationPolicy;
use crate::error::{validation, AppError, AppResult, OptionExt};
use crate::types::{CopyStatus, CreateBorrowRequest, RequestDto, RequestQuery, RequestStatus, SlipDto};

const REQUEST_SELECT: &str = r#"SELECT q.id, q.reader_id, r.full_name AS reader_name, q.copy_id, c.barcode,
           c.book_id, b.title, q.loan_days, q.status, q.note, q.reject_reason,
           q.processed_by, q.processed_at, q.slip_id, q.created_at
    FROM borrow_requests q
    JOIN readers r ON r.id = q.reader_id
    JOIN book_copies c ON c.id = q.copy_id
    JOIN books b ON b.id = c.book_id"#;

async fn copy_status(conn: &mut SqliteConnection, copy_id: i64) -> AppResult<(String, CopyStatus)> {
    let copy: Option<(String, CopyStatus)> =
        sqlx::query_as("SELECT barcode, status FROM book_copies WHERE id = ?1")
            .bind(copy_id)
            .fetch_optional(&mut *conn)
            .await?;
    copy.ok_or_else(|| AppError::NotFound(format!("Copy {} not found", copy_id)))
}

/// Places a request for one copy on behalf of `reader_id`.
///
/// Pending requests count against the borrowing limit so a reader cannot queue
/// more copies than they may hold.
pub async fn create(
    pool: &SqlitePool,
    policy: &CirculationPolicy,
    reader_id: i64,
    req: &CreateBorrowRequest,
    today: NaiveDate,
) -> AppResult<RequestDto> {
    let loan_days = req.loan_days.unwrap_or(policy.loan_days);
    if loan_days < 1 || loan_days > policy.loan_days {
        return Err(AppError::ValidationError {
            field: "loan_days".to_string(),
            message: format!("Must be in 1..={}", policy.loan_days),
        });
    }
    let note = validation::optional_text(req.note.as_deref(), "note", 500)?;

    let mut tx = crate::db::begin_write(pool).await?;

    let (barcode, status) = copy_status(&mut tx, req.copy_id).await?;
    if status != CopyStatus::Available {
        return Err(AppError::BadRequest(format!("Copy {} is not available", barcode)));
    }

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM borrow_requests WHERE reader_id = ?1 AND copy_id = ?2 AND status = 'ChoXuLy'",
    )
    .bind(reader_id)
    .bind(req.copy_id)
    .fetch_one(&mut *tx)
    .await?;
    if duplicate > 0 {
        return Err(AppError::Conflict(format!("A pending request for copy {} already exists", barcode)));
    }

    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM borrow_requests WHERE reader_id = ?1 AND status = 'ChoXuLy'")
            .bind(reader_id)
            .fetch_one(&mut *tx)
            .await?;
    ensure_reader_can_borrow(&mut tx, policy, reader_id, pending + 1, today).await?;

    let id = sqlx::query(
        r#"INSERT INTO borrow_requests (reader_id, copy_id, loan_days, status, note, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )
    .bind(reader_id)
    .bind(req.copy_id)
    .bind(loan_days)
    .bind(RequestStatus::Pending)
    .bind(&note)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let dto = fetch(&mut tx, id).await?;
    tx.commit().await?;
    tracing::info!(request_id = id, reader_id, copy_id = req.copy_id, "Borrow request placed");
    Ok(dto)
}

pub async fn fetch(conn: &mut SqliteConnection, id: i64) -> AppResult<RequestDto> {
    let dto = sqlx::query_as(&format!("{} WHERE q.id = ?1", REQUEST_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    dto.ok_or_not_found("Borrow request")
}

pub async fn list(pool: &SqlitePool, q: &RequestQuery) -> AppResult<Vec<RequestDto>> {
    let mut qb = QueryBuilder::<Sqlite>::new(REQUEST_SELECT);
    qb.push(" WHERE 1 = 1");
    if let Some(status) = q.status {
        qb.push(" AND q.status = ").push_bind(status);
    }
    if let Some(reader_id) = q.reader_id {
        qb.push(" AND q.reader_id = ").push_bind(reader_id);
    }
    qb.push(" ORDER BY q.created_at DESC, q.id DESC");
    Ok(qb.build_query_as().fetch_all(pool).await?)
}

async fn pending_request(conn: &mut SqliteConnection, id: i64) -> AppResult<(i64, i64, i64, RequestStatus)> {
    let row: Option<(i64, i64, i64, RequestStatus)> =
        sqlx::query_as("SELECT reader_id, copy_id, loan_days, status FROM borrow_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    row.ok_or_not_found("Borrow request")
}

/// Approves a pending request and opens a one-line slip for it.
///
/// The copy and reader are re-checked at approval time: the copy may have
/// been lent at the desk since the request was placed.
pub async fn approve(
    pool: &SqlitePool,
    policy: &CirculationPolicy,
    id: i64,
    staff_id: i64,
    today: NaiveDate,
) -> AppResult<(RequestDto, SlipDto)> {
    let mut tx = crate::db::begin_write(pool).await?;
    let (reader_id, copy_id, loan_days, status) = pending_request(&mut tx, id).await?;
    if status != RequestStatus::Pending {
        return Err(AppError::BadRequest(format!("Request {} is not pending", id)));
    }

    let (barcode, copy_state) = copy_status(&mut tx, copy_id).await?;
    if copy_state != CopyStatus::Available {
        return Err(AppError::BadRequest(format!("Copy {} is not available", barcode)));
    }
    ensure_reader_can_borrow(&mut tx, policy, reader_id, 1, today).await?;

    let slip_id = open_slip(&mut tx, reader_id, &[copy_id], loan_days, Some(staff_id), Some(id), today).await?;

    let updated = sqlx::query(
        r#"UPDATE borrow_requests
           SET status = 'DaDuyet', processed_by = ?1, processed_at = ?2, slip_id = ?3
           WHERE id = ?4 AND status = 'ChoXuLy'"#,
    )
    .bind(staff_id)
    .bind(Utc::now())
    .bind(slip_id)
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(AppError::Conflict(format!("Request {} was processed concurrently", id)));
    }

    let request = fetch(&mut tx, id).await?;
    let slip = fetch_slip(&mut tx, slip_id).await?;
    tx.commit().await?;

    tracing::info!(request_id = id, slip_id, "Borrow request approved");
    Ok((request, slip))
}

pub async fn reject(pool: &SqlitePool, id: i64, staff_id: i64, reason: &str) -> AppResult<RequestDto> {
    let reason = validation::required_text(reason, "reason", 500)?;
    let mut tx = crate::db::begin_write(pool).await?;
    let (_, _, _, status) = pending_request(&mut tx, id).await?;
    if status != RequestStatus::Pending {
        return Err(AppError::BadRequest(format!("Request {} is not pending", id)));
    }
    sqlx::query(
        r#"UPDATE borrow_requests
           SET status = 'TuChoi', reject_reason = ?1, processed_by = ?2, processed_at = ?3
           WHERE id = ?4"#,
    )
    .bind(&reason)
    .bind(staff_id)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let dto = fetch(&mut tx, id).await?;
    tx.commit().await?;
    tracing::info!(request_id = id, "Borrow request rejected");
    Ok(dto)
}

/// Withdraws a pending request. Only the reader who placed it may cancel it.
pub async fn cancel(pool: &SqlitePool, id: i64, reader_id: i64) -> AppResult<RequestDto> {
    let mut tx = crate::db::begin_write(pool).await?;
    let (owner, _, _, status) = pending_request(&mut tx, id).await?;
    if owner != reader_id {
        return Err(AppError::Forbidden("Request belongs to another reader".to_string()));
    }
    if status != RequestStatus::Pending {
        return Err(AppError::BadRequest(format!("Request {} is not pending", id)));
    }
    sqlx::query("UPDATE borrow_requests SET status = 'DaHuy', processed_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let dto = fetch(&mut tx, id).await?;
    tx.commit().await?;
    Ok(dto)
}
