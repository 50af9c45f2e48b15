//! Reader reminders.
//!
//! The daily job builds [`Reminder`]s and hands them to a [`ReminderSink`]. The
//! default sink stores them in the `notifications` table, which doubles as the
//! outbox for whatever mailer picks them up and as the reader's inbox.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::circulation::overdue::ReminderTarget;
use crate::circulation::overdue_days;
use crate::error::AppResult;
use crate::types::{NotificationDto, NotificationKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub reader_id: i64,
    pub slip_id: i64,
    pub email: Option<String>,
    pub kind: NotificationKind,
    pub notify_on: NaiveDate,
    pub subject: String,
    pub body: String,
}

impl Reminder {
    pub fn due_soon(target: &ReminderTarget, today: NaiveDate) -> Self {
        Self {
            reader_id: target.reader_id,
            slip_id: target.slip_id,
            email: target.email.clone(),
            kind: NotificationKind::DueSoon,
            notify_on: today,
            subject: format!("Nhắc hạn trả sách - phiếu #{}", target.slip_id),
            body: format!(
                "Xin chào {},\n\nCác sách sau cần được trả trước ngày {}: {}.\n\nThư viện",
                target.full_name,
                target.due_on.format("%d/%m/%Y"),
                target.titles
            ),
        }
    }

    pub fn overdue(target: &ReminderTarget, today: NaiveDate) -> Self {
        Self {
            reader_id: target.reader_id,
            slip_id: target.slip_id,
            email: target.email.clone(),
            kind: NotificationKind::Overdue,
            notify_on: today,
            subject: format!("Sách quá hạn - phiếu #{}", target.slip_id),
            body: format!(
                "Xin chào {},\n\nPhiếu mượn #{} đã quá hạn {} ngày (hạn trả {}): {}.\n\
                 Vui lòng trả sách sớm để tránh phát sinh thêm tiền phạt.\n\nThư viện",
                target.full_name,
                target.slip_id,
                overdue_days(target.due_on, today),
                target.due_on.format("%d/%m/%Y"),
                target.titles
            ),
        }
    }
}

/// Destination for reminders.
#[async_trait]
pub trait ReminderSink: Send + Sync {
    /// Delivers one reminder. Returns `false` when the same reminder (slip, kind,
    /// day) was already delivered.
    async fn deliver(&self, reminder: &Reminder) -> anyhow::Result<bool>;
}

/// Writes reminders to the `notifications` table.
pub struct OutboxSink {
    pool: SqlitePool,
}

impl OutboxSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReminderSink for OutboxSink {
    async fn deliver(&self, reminder: &Reminder) -> anyhow::Result<bool> {
        // single statement so two concurrent runs cannot both insert
        let res = sqlx::query(
            r#"INSERT INTO notifications (reader_id, slip_id, kind, subject, body, notify_on, created_at)
               SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
               WHERE NOT EXISTS (
                   SELECT 1 FROM notifications WHERE slip_id = ?2 AND kind = ?3 AND notify_on = ?6
               )"#,
        )
        .bind(reminder.reader_id)
        .bind(reminder.slip_id)
        .bind(reminder.kind)
        .bind(&reminder.subject)
        .bind(&reminder.body)
        .bind(reminder.notify_on)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let queued = res.rows_affected() > 0;
        if queued {
            match reminder.email.as_deref() {
                Some(email) => tracing::info!(slip_id = reminder.slip_id, kind = ?reminder.kind, "Queued reminder for {}", email),
                None => tracing::debug!(slip_id = reminder.slip_id, "Reader has no email, reminder kept in inbox only"),
            }
        }
        Ok(queued)
    }
}

pub async fn list_for_reader(pool: &SqlitePool, reader_id: i64) -> AppResult<Vec<NotificationDto>> {
    let rows = sqlx::query_as(
        r#"SELECT id, reader_id, slip_id, kind, subject, body, notify_on, created_at
           FROM notifications WHERE reader_id = ?1
           ORDER BY notify_on DESC, id DESC
           LIMIT 200"#,
    )
    .bind(reader_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
