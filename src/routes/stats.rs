use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::{error::AppResult, middleware::CurrentUser, state::AppState};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Dashboard {
    pub books: i64,
    pub copies_total: i64,
    pub copies_available: i64,
    pub copies_borrowed: i64,
    pub copies_damaged: i64,
    pub copies_lost: i64,
    pub readers: i64,
    pub open_slips: i64,
    pub overdue_slips: i64,
    pub pending_requests: i64,
    pub unpaid_fine_total: i64,
    pub paid_fine_total: i64,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopBook {
    pub book_id: i64,
    pub title: String,
    pub author_name: Option<String>,
    pub borrow_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub month: u32,
    pub slips: i64,
    pub copies: i64,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

pub async fn dashboard(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Dashboard>> {
    user.require_staff()?;
    let db = &state.db;
    let mut d = Dashboard::default();

    d.books = sqlx::query_scalar("SELECT COUNT(*) FROM books").fetch_one(db).await?;
    d.readers = sqlx::query_scalar("SELECT COUNT(*) FROM readers").fetch_one(db).await?;

    let by_status: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM book_copies GROUP BY status").fetch_all(db).await?;
    for (status, n) in by_status {
        d.copies_total += n;
        match status.as_str() {
            "Con" => d.copies_available = n,
            "DangMuon" => d.copies_borrowed = n,
            "Hong" => d.copies_damaged = n,
            "Mat" => d.copies_lost = n,
            _ => {}
        }
    }

    // overdue by due date, whether or not the daily job has flagged the slip yet
    let (open, overdue): (i64, i64) = sqlx::query_as(
        r#"SELECT COALESCE(SUM(status <> 'DaTra'), 0),
                  COALESCE(SUM(status <> 'DaTra' AND due_on < ?1), 0)
           FROM borrow_slips"#,
    )
    .bind(crate::today())
    .fetch_one(db)
    .await?;
    d.open_slips = open;
    d.overdue_slips = overdue;

    d.pending_requests = sqlx::query_scalar("SELECT COUNT(*) FROM borrow_requests WHERE status = 'ChoXuLy'")
        .fetch_one(db)
        .await?;

    let (unpaid, paid): (i64, i64) = sqlx::query_as(
        r#"SELECT COALESCE(SUM(CASE WHEN status = 'ChuaThanhToan' THEN amount END), 0),
                  COALESCE(SUM(CASE WHEN status = 'DaThanhToan' THEN amount END), 0)
           FROM fines"#,
    )
    .fetch_one(db)
    .await?;
    d.unpaid_fine_total = unpaid;
    d.paid_fine_total = paid;

    Ok(Json(d))
}

pub async fn top_books(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<TopQuery>,
) -> AppResult<Json<Vec<TopBook>>> {
    user.require_staff()?;
    let limit = q.limit.unwrap_or(10).clamp(1, 100);
    let rows = sqlx::query_as(
        r#"SELECT b.id AS book_id, b.title, a.name AS author_name, COUNT(l.id) AS borrow_count
           FROM borrow_lines l
           JOIN book_copies c ON c.id = l.copy_id
           JOIN books b ON b.id = c.book_id
           LEFT JOIN authors a ON a.id = b.author_id
           GROUP BY b.id
           ORDER BY borrow_count DESC, b.id
           LIMIT ?1"#,
    )
    .bind(limit)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// Always twelve buckets, months without slips report zero.
pub async fn monthly(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<YearQuery>,
) -> AppResult<Json<Vec<MonthlyCount>>> {
    user.require_staff()?;
    let year = q.year.unwrap_or_else(|| crate::today().year());
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
        r#"SELECT CAST(strftime('%m', s.borrowed_on) AS INTEGER) AS month,
                  COUNT(DISTINCT s.id),
                  COUNT(l.id)
           FROM borrow_slips s
           LEFT JOIN borrow_lines l ON l.slip_id = s.id
           WHERE strftime('%Y', s.borrowed_on) = ?1
           GROUP BY month"#,
    )
    .bind(format!("{:04}", year))
    .fetch_all(&state.db)
    .await?;

    let mut buckets: Vec<MonthlyCount> = (1..=12).map(|month| MonthlyCount { month, slips: 0, copies: 0 }).collect();
    for (month, slips, copies) in rows {
        if let Some(bucket) = usize::try_from(month - 1).ok().and_then(|i| buckets.get_mut(i)) {
            bucket.slips = slips;
            bucket.copies = copies;
        }
    }
    Ok(Json(buckets))
}
