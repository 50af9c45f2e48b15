use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::{assess_return, due_date, overdue_days, CirculationPolicy};
use crate::error::{AppError, AppResult, OptionExt};
use crate::types::{
    BorrowRequest, CopyStatus, FineDto, FineStatus, OverdueSlip, Page, ReturnDto, ReturnOutcome, ReturnRequest,
    SlipDto, SlipLineDto, SlipQuery, SlipStatus, SlipSummary,
};

const SLIP_SELECT: &str = r#"SELECT s.id, s.reader_id, r.full_name AS reader_name, s.staff_id, s.request_id,
           s.borrowed_on, s.due_on, s.status, s.renewals
    FROM borrow_slips s JOIN readers r ON r.id = s.reader_id"#;

/// Longest loan staff may grant on a single slip.
pub const MAX_LOAN_DAYS: i64 = 365;

/// Checks that `reader_id` may take `additional` more copies home.
///
/// Rules: the reader exists, their card has not expired, they have no unpaid
/// fines (when the policy blocks on fines), and open lines plus `additional`
/// stay within `max_active_loans`.
pub(crate) async fn ensure_reader_can_borrow(
    conn: &mut SqliteConnection,
    policy: &CirculationPolicy,
    reader_id: i64,
    additional: i64,
    today: NaiveDate,
) -> AppResult<()> {
    let reader: Option<(i64, Option<NaiveDate>)> =
        sqlx::query_as("SELECT id, card_expires_on FROM readers WHERE id = ?1")
            .bind(reader_id)
            .fetch_optional(&mut *conn)
            .await?;
    let (_, card_expires_on) = reader.ok_or_not_found("Reader")?;

    if let Some(expires) = card_expires_on {
        if expires < today {
            return Err(AppError::BadRequest(format!("Reader card expired on {}", expires)));
        }
    }

    if policy.block_on_unpaid_fines {
        let unpaid: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fines WHERE reader_id = ?1 AND status = 'ChuaThanhToan'")
                .bind(reader_id)
                .fetch_one(&mut *conn)
                .await?;
        if unpaid > 0 {
            return Err(AppError::BadRequest(format!("Reader has {} unpaid fine(s)", unpaid)));
        }
    }

    let active = active_loan_count(conn, reader_id).await?;
    if active + additional > policy.max_active_loans {
        return Err(AppError::BadRequest(format!(
            "Borrowing limit reached: {} open, {} requested, limit {}",
            active, additional, policy.max_active_loans
        )));
    }
    Ok(())
}

/// Copies the reader currently holds.
pub(crate) async fn active_loan_count(conn: &mut SqliteConnection, reader_id: i64) -> AppResult<i64> {
    let n: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM borrow_lines l JOIN borrow_slips s ON s.id = l.slip_id
           WHERE s.reader_id = ?1 AND l.returned = 0"#,
    )
    .bind(reader_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(n)
}

/// Inserts a slip with one line per copy and claims every copy.
///
/// Must run inside a transaction: on any error the caller drops it and nothing
/// is kept. Each copy is claimed with a conditional update so two desks lending
/// the same copy cannot both succeed.
pub(crate) async fn open_slip(
    conn: &mut SqliteConnection,
    reader_id: i64,
    copy_ids: &[i64],
    loan_days: i64,
    staff_id: Option<i64>,
    request_id: Option<i64>,
    today: NaiveDate,
) -> AppResult<i64> {
    if copy_ids.is_empty() {
        return Err(AppError::ValidationError {
            field: "copy_ids".to_string(),
            message: "At least one copy is required".to_string(),
        });
    }
    let mut seen = HashSet::with_capacity(copy_ids.len());
    if let Some(dup) = copy_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(AppError::ValidationError {
            field: "copy_ids".to_string(),
            message: format!("Copy {} is listed more than once", dup),
        });
    }

    let slip_id = sqlx::query(
        r#"INSERT INTO borrow_slips (reader_id, staff_id, request_id, borrowed_on, due_on, status, renewals, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)"#,
    )
    .bind(reader_id)
    .bind(staff_id)
    .bind(request_id)
    .bind(today)
    .bind(due_date(today, loan_days))
    .bind(SlipStatus::Open)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for copy_id in copy_ids {
        let copy: Option<(String, CopyStatus)> =
            sqlx::query_as("SELECT barcode, status FROM book_copies WHERE id = ?1")
                .bind(copy_id)
                .fetch_optional(&mut *conn)
                .await?;
        let (barcode, _) = copy.ok_or_else(|| AppError::NotFound(format!("Copy {} not found", copy_id)))?;

        let claimed = sqlx::query("UPDATE book_copies SET status = 'DangMuon' WHERE id = ?1 AND status = 'Con'")
            .bind(copy_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if claimed == 0 {
            return Err(AppError::BadRequest(format!("Copy {} is not available", barcode)));
        }

        sqlx::query("INSERT INTO borrow_lines (slip_id, copy_id, returned) VALUES (?1, ?2, 0)")
            .bind(slip_id)
            .bind(copy_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(slip_id)
}

/// Lends copies directly at the desk.
pub async fn borrow(
    pool: &SqlitePool,
    policy: &CirculationPolicy,
    req: &BorrowRequest,
    staff_id: i64,
    today: NaiveDate,
) -> AppResult<SlipDto> {
    let loan_days = req.loan_days.unwrap_or(policy.loan_days);
    if !(1..=MAX_LOAN_DAYS).contains(&loan_days) {
        return Err(AppError::ValidationError {
            field: "loan_days".to_string(),
            message: format!("Must be in 1..={}", MAX_LOAN_DAYS),
        });
    }

    let mut tx = crate::db::begin_write(pool).await?;
    ensure_reader_can_borrow(&mut tx, policy, req.reader_id, req.copy_ids.len() as i64, today).await?;
    let slip_id = open_slip(&mut tx, req.reader_id, &req.copy_ids, loan_days, Some(staff_id), None, today).await?;
    let slip = fetch_slip(&mut tx, slip_id).await?;
    tx.commit().await?;

    tracing::info!(slip_id, reader_id = req.reader_id, copies = req.copy_ids.len(), "Opened borrow slip");
    Ok(slip)
}

pub async fn fetch_slip(conn: &mut SqliteConnection, slip_id: i64) -> AppResult<SlipDto> {
    let slip: SlipSummary = sqlx::query_as(&format!("{} WHERE s.id = ?1", SLIP_SELECT))
        .bind(slip_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_not_found("Borrow slip")?;
    let lines = fetch_lines(conn, slip_id).await?;
    Ok(SlipDto { slip, lines })
}

async fn fetch_lines(conn: &mut SqliteConnection, slip_id: i64) -> AppResult<Vec<SlipLineDto>> {
    let lines = sqlx::query_as(
        r#"SELECT l.id, l.copy_id, c.barcode, c.book_id, b.title, l.returned,
                  rt.returned_on, rt.condition
           FROM borrow_lines l
           JOIN book_copies c ON c.id = l.copy_id
           JOIN books b ON b.id = c.book_id
           LEFT JOIN returns rt ON rt.line_id = l.id
           WHERE l.slip_id = ?1
           ORDER BY l.id"#,
    )
    .bind(slip_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lines)
}

fn push_slip_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, q: &SlipQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = q.status {
        qb.push(" AND s.status = ").push_bind(status);
    }
    if let Some(reader_id) = q.reader_id {
        qb.push(" AND s.reader_id = ").push_bind(reader_id);
    }
}

pub async fn list_slips(pool: &SqlitePool, q: &SlipQuery) -> AppResult<Page<SlipSummary>> {
    let (page, page_size, offset) =
        crate::types::PageQuery { page: q.page, page_size: q.page_size }.resolve();

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM borrow_slips s");
    push_slip_filters(&mut count, q);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut items = QueryBuilder::<Sqlite>::new(SLIP_SELECT);
    push_slip_filters(&mut items, q);
    items.push(" ORDER BY s.borrowed_on DESC, s.id DESC LIMIT ").push_bind(page_size);
    items.push(" OFFSET ").push_bind(offset);
    let items: Vec<SlipSummary> = items.build_query_as().fetch_all(pool).await?;

    Ok(Page { items, total, page, page_size })
}

/// Every slip of a reader with its lines, newest first.
pub async fn reader_history(pool: &SqlitePool, reader_id: i64) -> AppResult<Vec<SlipDto>> {
    let mut conn = pool.acquire().await?;
    let slips: Vec<SlipSummary> = sqlx::query_as(&format!(
        "{} WHERE s.reader_id = ?1 ORDER BY s.borrowed_on DESC, s.id DESC",
        SLIP_SELECT
    ))
    .bind(reader_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::with_capacity(slips.len());
    for slip in slips {
        let lines = fetch_lines(&mut conn, slip.id).await?;
        out.push(SlipDto { slip, lines });
    }
    Ok(out)
}

/// Open slips whose due date lies before `today`, whether or not the daily job
/// has flagged them yet.
pub async fn overdue_slips(pool: &SqlitePool, today: NaiveDate) -> AppResult<Vec<OverdueSlip>> {
    let slips: Vec<SlipSummary> = sqlx::query_as(&format!(
        "{} WHERE s.status IN ('DangMuon', 'QuaHan') AND s.due_on < ?1 ORDER BY s.due_on, s.id",
        SLIP_SELECT
    ))
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(slips.len());
    for slip in slips {
        let open_lines: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM borrow_lines WHERE slip_id = ?1 AND returned = 0")
                .bind(slip.id)
                .fetch_one(pool)
                .await?;
        out.push(OverdueSlip { overdue_days: overdue_days(slip.due_on, today), open_lines, slip });
    }
    Ok(out)
}

/// Checks in some or all lines of a slip.
///
/// Per line: a return row, fines from [`assess_return`], the copy status from
/// the condition, and the line marked returned. The slip closes once no line
/// is outstanding. All of it commits together.
pub async fn return_items(
    pool: &SqlitePool,
    policy: &CirculationPolicy,
    slip_id: i64,
    req: &ReturnRequest,
    staff_id: i64,
    today: NaiveDate,
) -> AppResult<ReturnOutcome> {
    if req.items.is_empty() {
        return Err(AppError::ValidationError {
            field: "items".to_string(),
            message: "At least one line must be returned".to_string(),
        });
    }
    let mut seen = HashSet::new();
    if let Some(dup) = req.items.iter().find(|i| !seen.insert(i.line_id)) {
        return Err(AppError::ValidationError {
            field: "items".to_string(),
            message: format!("Line {} is listed more than once", dup.line_id),
        });
    }

    let returned_on = req.returned_on.unwrap_or(today);
    if returned_on > today {
        return Err(AppError::InvalidInput("returned_on cannot be in the future".to_string()));
    }

    let mut tx = crate::db::begin_write(pool).await?;

    let slip: Option<(i64, NaiveDate, NaiveDate, SlipStatus)> =
        sqlx::query_as("SELECT reader_id, borrowed_on, due_on, status FROM borrow_slips WHERE id = ?1")
            .bind(slip_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (reader_id, borrowed_on, due_on, status) = slip.ok_or_not_found("Borrow slip")?;
    if status == SlipStatus::Returned {
        return Err(AppError::BadRequest("Borrow slip is already fully returned".to_string()));
    }
    if returned_on < borrowed_on {
        return Err(AppError::InvalidInput("returned_on is before the borrow date".to_string()));
    }

    let now = Utc::now();
    let days_late = overdue_days(due_on, returned_on);
    let mut returns = Vec::with_capacity(req.items.len());
    let mut fines = Vec::new();

    for item in &req.items {
        let line: Option<(i64, bool, i64)> = sqlx::query_as(
            r#"SELECT l.copy_id, l.returned, b.price
               FROM borrow_lines l
               JOIN book_copies c ON c.id = l.copy_id
               JOIN books b ON b.id = c.book_id
               WHERE l.id = ?1 AND l.slip_id = ?2"#,
        )
        .bind(item.line_id)
        .bind(slip_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (copy_id, already_returned, price) = line.ok_or_else(|| {
            AppError::BadRequest(format!("Line {} does not belong to slip {}", item.line_id, slip_id))
        })?;
        if already_returned {
            return Err(AppError::BadRequest(format!("Line {} was already returned", item.line_id)));
        }

        let note = crate::error::validation::optional_text(item.note.as_deref(), "note", 500)?;
        let return_id = sqlx::query(
            r#"INSERT INTO returns (line_id, returned_on, condition, overdue_days, note, staff_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(item.line_id)
        .bind(returned_on)
        .bind(item.condition)
        .bind(days_late)
        .bind(&note)
        .bind(staff_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE borrow_lines SET returned = 1 WHERE id = ?1")
            .bind(item.line_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE book_copies SET status = ?1 WHERE id = ?2")
            .bind(item.condition.copy_status())
            .bind(copy_id)
            .execute(&mut *tx)
            .await?;

        for fine in assess_return(policy, due_on, returned_on, item.condition, price) {
            let fine_id = sqlx::query(
                r#"INSERT INTO fines (reader_id, return_id, reason, amount, status, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            )
            .bind(reader_id)
            .bind(return_id)
            .bind(fine.reason)
            .bind(fine.amount)
            .bind(FineStatus::Unpaid)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            fines.push(FineDto {
                id: fine_id,
                reader_id,
                return_id: Some(return_id),
                reason: fine.reason,
                amount: fine.amount,
                status: FineStatus::Unpaid,
                created_at: now,
                paid_at: None,
                payment_id: None,
            });
        }

        returns.push(ReturnDto {
            id: return_id,
            line_id: item.line_id,
            returned_on,
            condition: item.condition,
            overdue_days: days_late,
            note,
        });
    }

    let outstanding: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM borrow_lines WHERE slip_id = ?1 AND returned = 0")
            .bind(slip_id)
            .fetch_one(&mut *tx)
            .await?;
    let slip_status = if outstanding == 0 {
        sqlx::query("UPDATE borrow_slips SET status = 'DaTra' WHERE id = ?1")
            .bind(slip_id)
            .execute(&mut *tx)
            .await?;
        SlipStatus::Returned
    } else {
        status
    };

    tx.commit().await?;

    tracing::info!(slip_id, returned = returns.len(), fines = fines.len(), "Processed return");
    Ok(ReturnOutcome { slip_id, slip_status, returns, fines })
}

/// Pushes the due date out by one loan period.
pub async fn renew(
    pool: &SqlitePool,
    policy: &CirculationPolicy,
    slip_id: i64,
    today: NaiveDate,
) -> AppResult<SlipDto> {
    let mut tx = crate::db::begin_write(pool).await?;
    let slip: Option<(NaiveDate, SlipStatus, i64)> =
        sqlx::query_as("SELECT due_on, status, renewals FROM borrow_slips WHERE id = ?1")
            .bind(slip_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (due_on, status, renewals) = slip.ok_or_not_found("Borrow slip")?;

    match status {
        SlipStatus::Returned => return Err(AppError::BadRequest("Borrow slip is already returned".to_string())),
        SlipStatus::Overdue => return Err(AppError::BadRequest("Overdue slips cannot be renewed".to_string())),
        SlipStatus::Open if due_on < today => {
            return Err(AppError::BadRequest("Overdue slips cannot be renewed".to_string()))
        }
        SlipStatus::Open => {}
    }
    if renewals >= policy.max_renewals {
        return Err(AppError::BadRequest(format!("Renewal limit of {} reached", policy.max_renewals)));
    }

    sqlx::query("UPDATE borrow_slips SET due_on = ?1, renewals = renewals + 1 WHERE id = ?2")
        .bind(due_date(due_on, policy.loan_days))
        .bind(slip_id)
        .execute(&mut *tx)
        .await?;
    let slip = fetch_slip(&mut tx, slip_id).await?;
    tx.commit().await?;
    Ok(slip)
}
