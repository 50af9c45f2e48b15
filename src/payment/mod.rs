//! Fines and their payment.
//!
//! A fine is settled either in cash at the desk or by a VietQR bank transfer.
//! For transfers we create a payment carrying a short code; the reader puts the
//! code into the transfer content and [`refresh_payment`] matches it against the
//! bank's transaction list.

pub mod sepay;

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use self::sepay::{BankTransaction, PaymentGateway};
use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult, OptionExt};
use crate::types::{FineDto, FineQuery, FineStatus, PaymentDto, PaymentStatus};

const FINE_SELECT: &str =
    "SELECT id, reader_id, return_id, reason, amount, status, created_at, paid_at, payment_id FROM fines";
const PAYMENT_SELECT: &str = r#"SELECT id, reader_id, code, amount, status, qr_url, gateway_ref,
           created_at, expires_at, paid_at FROM payments"#;

/// `TV` followed by ten upper-case hex characters.
pub fn generate_code() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TV{}", &hex[..10])
}

/// VietQR image URL for a transfer of `amount` with `code` as content.
pub fn qr_url(cfg: &PaymentConfig, amount: i64, code: &str) -> String {
    format!(
        "{}?acc={}&bank={}&amount={}&des={}",
        cfg.qr_base.trim_end_matches('/'),
        cfg.account_number.trim(),
        cfg.bank_code.trim(),
        amount,
        code
    )
}

fn normalize(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_uppercase).collect()
}

/// First transaction whose content contains `code` (case and spaces ignored)
/// and whose incoming amount covers `amount`.
pub fn find_matching<'a>(code: &str, amount: i64, txs: &'a [BankTransaction]) -> Option<&'a BankTransaction> {
    let code = normalize(code);
    if code.is_empty() {
        return None;
    }
    txs.iter().find(|tx| tx.amount_in >= amount && normalize(&tx.content).contains(&code))
}

// Fines

pub async fn list_fines(pool: &SqlitePool, q: &FineQuery) -> AppResult<Vec<FineDto>> {
    let mut qb = QueryBuilder::<Sqlite>::new(FINE_SELECT);
    qb.push(" WHERE 1 = 1");
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(reader_id) = q.reader_id {
        qb.push(" AND reader_id = ").push_bind(reader_id);
    }
    qb.push(" ORDER BY created_at DESC, id DESC");
    Ok(qb.build_query_as().fetch_all(pool).await?)
}

async fn fetch_fine(conn: &mut SqliteConnection, id: i64) -> AppResult<FineDto> {
    let fine: Option<FineDto> = sqlx::query_as(&format!("{} WHERE id = ?1", FINE_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    fine.ok_or_not_found("Fine")
}

async fn attached_to_pending_payment(conn: &mut SqliteConnection, fine_id: i64) -> AppResult<bool> {
    let n: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM payment_fines pf JOIN payments p ON p.id = pf.payment_id
           WHERE pf.fine_id = ?1 AND p.status = 'ChoThanhToan'"#,
    )
    .bind(fine_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(n > 0)
}

async fn expire_in(conn: &mut SqliteConnection, now: DateTime<Utc>) -> AppResult<u64> {
    let res = sqlx::query("UPDATE payments SET status = 'HetHan' WHERE status = 'ChoThanhToan' AND expires_at <= ?1")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

/// Cash payment at the desk.
pub async fn pay_fine_at_desk(pool: &SqlitePool, fine_id: i64, now: DateTime<Utc>) -> AppResult<FineDto> {
    let mut tx = crate::db::begin_write(pool).await?;
    let fine = fetch_fine(&mut tx, fine_id).await?;
    if fine.status == FineStatus::Paid {
        return Err(AppError::Conflict(format!("Fine {} is already paid", fine_id)));
    }
    expire_in(&mut tx, now).await?;
    if attached_to_pending_payment(&mut tx, fine_id).await? {
        return Err(AppError::Conflict(format!("Fine {} is part of a pending QR payment", fine_id)));
    }
    sqlx::query("UPDATE fines SET status = 'DaThanhToan', paid_at = ?1 WHERE id = ?2 AND status = 'ChuaThanhToan'")
        .bind(now)
        .bind(fine_id)
        .execute(&mut *tx)
        .await?;
    let fine = fetch_fine(&mut tx, fine_id).await?;
    tx.commit().await?;
    tracing::info!(fine_id, amount = fine.amount, "Fine paid at desk");
    Ok(fine)
}

// Payments

pub async fn fetch_payment(pool: &SqlitePool, id: i64) -> AppResult<PaymentDto> {
    let payment: Option<PaymentDto> = sqlx::query_as(&format!("{} WHERE id = ?1", PAYMENT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    payment.ok_or_not_found("Payment")
}

pub async fn list_payments(pool: &SqlitePool, reader_id: Option<i64>) -> AppResult<Vec<PaymentDto>> {
    let mut qb = QueryBuilder::<Sqlite>::new(PAYMENT_SELECT);
    if let Some(reader_id) = reader_id {
        qb.push(" WHERE reader_id = ").push_bind(reader_id);
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT 500");
    Ok(qb.build_query_as().fetch_all(pool).await?)
}

/// Opens a QR payment for some or all unpaid fines of a reader.
///
/// With `fine_ids` omitted every unpaid fine that is not already on a pending
/// payment is included.
pub async fn create_payment(
    pool: &SqlitePool,
    cfg: &PaymentConfig,
    reader_id: i64,
    fine_ids: Option<&[i64]>,
    now: DateTime<Utc>,
) -> AppResult<PaymentDto> {
    let mut tx = crate::db::begin_write(pool).await?;

    let reader: Option<i64> = sqlx::query_scalar("SELECT id FROM readers WHERE id = ?1")
        .bind(reader_id)
        .fetch_optional(&mut *tx)
        .await?;
    reader.ok_or_not_found("Reader")?;

    // stale payments must not block their fines
    expire_in(&mut tx, now).await?;

    let fines: Vec<FineDto> = match fine_ids {
        Some(ids) => {
            if ids.is_empty() {
                return Err(AppError::ValidationError {
                    field: "fine_ids".to_string(),
                    message: "At least one fine is required".to_string(),
                });
            }
            let mut fines = Vec::with_capacity(ids.len());
            for id in ids {
                if fines.iter().any(|f: &FineDto| f.id == *id) {
                    continue;
                }
                let fine = fetch_fine(&mut tx, *id).await?;
                if fine.reader_id != reader_id {
                    return Err(AppError::BadRequest(format!("Fine {} belongs to another reader", id)));
                }
                if fine.status == FineStatus::Paid {
                    return Err(AppError::Conflict(format!("Fine {} is already paid", id)));
                }
                if attached_to_pending_payment(&mut tx, *id).await? {
                    return Err(AppError::Conflict(format!("Fine {} is already part of a pending payment", id)));
                }
                fines.push(fine);
            }
            fines
        }
        None => {
            sqlx::query_as(&format!(
                r#"{} WHERE reader_id = ?1 AND status = 'ChuaThanhToan'
                   AND id NOT IN (
                       SELECT pf.fine_id FROM payment_fines pf JOIN payments p ON p.id = pf.payment_id
                       WHERE p.status = 'ChoThanhToan'
                   )
                   ORDER BY id"#,
                FINE_SELECT
            ))
            .bind(reader_id)
            .fetch_all(&mut *tx)
            .await?
        }
    };
    if fines.is_empty() {
        return Err(AppError::BadRequest("No unpaid fines to pay".to_string()));
    }

    let amount: i64 = fines.iter().map(|f| f.amount).sum();
    let code = generate_code();
    let url = qr_url(cfg, amount, &code);
    let expires_at = now + Duration::minutes(cfg.expiry_minutes);

    let payment_id = sqlx::query(
        r#"INSERT INTO payments (reader_id, code, amount, status, qr_url, created_at, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
    )
    .bind(reader_id)
    .bind(&code)
    .bind(amount)
    .bind(PaymentStatus::Pending)
    .bind(&url)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for fine in &fines {
        sqlx::query("INSERT INTO payment_fines (payment_id, fine_id) VALUES (?1, ?2)")
            .bind(payment_id)
            .bind(fine.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(payment_id, reader_id, amount, fines = fines.len(), "Created QR payment {}", code);
    Ok(PaymentDto {
        id: payment_id,
        reader_id,
        code,
        amount,
        status: PaymentStatus::Pending,
        qr_url: url,
        gateway_ref: None,
        created_at: now,
        expires_at,
        paid_at: None,
    })
}

/// Marks the payment and its fines paid. Returns `false` when the payment was no
/// longer pending.
pub async fn confirm(pool: &SqlitePool, payment_id: i64, gateway_ref: &str, now: DateTime<Utc>) -> AppResult<bool> {
    let mut tx = crate::db::begin_write(pool).await?;
    let updated = sqlx::query(
        r#"UPDATE payments SET status = 'DaThanhToan', paid_at = ?1, gateway_ref = ?2
           WHERE id = ?3 AND status = 'ChoThanhToan'"#,
    )
    .bind(now)
    .bind(gateway_ref)
    .bind(payment_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"UPDATE fines SET status = 'DaThanhToan', paid_at = ?1, payment_id = ?2
           WHERE status = 'ChuaThanhToan'
             AND id IN (SELECT fine_id FROM payment_fines WHERE payment_id = ?2)"#,
    )
    .bind(now)
    .bind(payment_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(true)
}

/// Re-checks a pending payment.
///
/// Expired payments become HetHan without asking the bank. Otherwise the gateway
/// is queried; its errors are returned and leave the payment untouched. The
/// boolean is `true` when this call confirmed the payment.
pub async fn refresh_payment(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    payment_id: i64,
    now: DateTime<Utc>,
) -> AppResult<(PaymentDto, bool)> {
    let payment = fetch_payment(pool, payment_id).await?;
    if payment.status != PaymentStatus::Pending {
        return Ok((payment, false));
    }

    if payment.expires_at <= now {
        sqlx::query("UPDATE payments SET status = 'HetHan' WHERE id = ?1 AND status = 'ChoThanhToan'")
            .bind(payment_id)
            .execute(pool)
            .await?;
        tracing::info!(payment_id, "Payment {} expired", payment.code);
        return Ok((fetch_payment(pool, payment_id).await?, false));
    }

    let txs = gateway.recent_transactions().await?;
    let confirmed = match find_matching(&payment.code, payment.amount, &txs) {
        Some(bank_tx) => {
            let reference = bank_tx.reference.as_deref().unwrap_or(&bank_tx.id);
            let confirmed = confirm(pool, payment_id, reference, now).await?;
            if confirmed {
                tracing::info!(payment_id, bank_tx = %bank_tx.id, "Payment {} confirmed", payment.code);
            }
            confirmed
        }
        None => false,
    };

    Ok((fetch_payment(pool, payment_id).await?, confirmed))
}

/// Expires every pending payment past its deadline.
pub async fn expire_stale(pool: &SqlitePool, now: DateTime<Utc>) -> AppResult<u64> {
    let mut conn = pool.acquire().await?;
    expire_in(&mut conn, now).await
}
