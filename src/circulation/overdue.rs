//! Queries used by the daily job.

use chrono::NaiveDate;
use sqlx::SqlitePool;

use super::due_date;
use crate::error::AppResult;

/// A slip that should get a reminder, with the titles still out.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderTarget {
    pub slip_id: i64,
    pub reader_id: i64,
    pub full_name: String,
    pub email: Option<String>,
    pub due_on: NaiveDate,
    pub titles: String,
}

const TARGET_SELECT: &str = r#"SELECT s.id AS slip_id, s.reader_id, r.full_name, r.email, s.due_on,
           GROUP_CONCAT(b.title, ', ') AS titles
    FROM borrow_slips s
    JOIN readers r ON r.id = s.reader_id
    JOIN borrow_lines l ON l.slip_id = s.id AND l.returned = 0
    JOIN book_copies c ON c.id = l.copy_id
    JOIN books b ON b.id = c.book_id"#;

/// Flips open slips whose due date has passed to QuaHan. Returns the number flipped.
pub async fn mark_overdue(pool: &SqlitePool, today: NaiveDate) -> AppResult<u64> {
    let res = sqlx::query("UPDATE borrow_slips SET status = 'QuaHan' WHERE status = 'DangMuon' AND due_on < ?1")
        .bind(today)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Open slips due exactly `days_before` days from `today`.
pub async fn due_soon(pool: &SqlitePool, today: NaiveDate, days_before: i64) -> AppResult<Vec<ReminderTarget>> {
    let targets = sqlx::query_as(&format!(
        "{} WHERE s.status = 'DangMuon' AND s.due_on = ?1 GROUP BY s.id ORDER BY s.id",
        TARGET_SELECT
    ))
    .bind(due_date(today, days_before))
    .fetch_all(pool)
    .await?;
    Ok(targets)
}

/// Slips flagged QuaHan that still have copies out.
pub async fn overdue(pool: &SqlitePool) -> AppResult<Vec<ReminderTarget>> {
    let targets = sqlx::query_as(&format!("{} WHERE s.status = 'QuaHan' GROUP BY s.id ORDER BY s.id", TARGET_SELECT))
        .fetch_all(pool)
        .await?;
    Ok(targets)
}
