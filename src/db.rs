use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::config::AppConfig;
use crate::types::Role;

/// Starts a transaction that holds the database write lock from its first statement.
///
/// The no-op `UPDATE` waits for the lock (up to `busy_timeout`) before any read
/// snapshot exists, so reads inside the transaction see the latest commit.
pub async fn begin_write(pool: &SqlitePool) -> sqlx::Result<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE system_config SET value = value WHERE 0").execute(&mut *tx).await?;
    Ok(tx)
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys are critical - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    let tables: [(&str, &str); 16] = [
        (
            "authors",
            r#"CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                biography TEXT NULL,
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "genres",
            r#"CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NULL
            )"#,
        ),
        (
            "publishers",
            r#"CREATE TABLE IF NOT EXISTS publishers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                address TEXT NULL,
                phone TEXT NULL,
                email TEXT NULL
            )"#,
        ),
        (
            "books",
            r#"CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author_id INTEGER NULL REFERENCES authors(id),
                genre_id INTEGER NULL REFERENCES genres(id),
                publisher_id INTEGER NULL REFERENCES publishers(id),
                publish_year INTEGER NULL,
                isbn TEXT NULL UNIQUE,
                price INTEGER NOT NULL DEFAULT 0,
                description TEXT NULL,
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "book_copies",
            r#"CREATE TABLE IF NOT EXISTS book_copies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                barcode TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'Con'
                    CHECK (status IN ('Con','DangMuon','Hong','Mat'))
            )"#,
        ),
        (
            "accounts",
            r#"CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('Admin','ThuThu','DocGia')),
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "readers",
            r#"CREATE TABLE IF NOT EXISTS readers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NULL UNIQUE REFERENCES accounts(id) ON DELETE SET NULL,
                full_name TEXT NOT NULL,
                email TEXT NULL,
                phone TEXT NULL,
                address TEXT NULL,
                card_expires_on TEXT NULL,
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "borrow_requests",
            r#"CREATE TABLE IF NOT EXISTS borrow_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reader_id INTEGER NOT NULL REFERENCES readers(id),
                copy_id INTEGER NOT NULL REFERENCES book_copies(id),
                loan_days INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'ChoXuLy'
                    CHECK (status IN ('ChoXuLy','DaDuyet','TuChoi','DaHuy')),
                note TEXT NULL,
                reject_reason TEXT NULL,
                processed_by INTEGER NULL REFERENCES accounts(id) ON DELETE SET NULL,
                processed_at TEXT NULL,
                slip_id INTEGER NULL REFERENCES borrow_slips(id),
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "borrow_slips",
            r#"CREATE TABLE IF NOT EXISTS borrow_slips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reader_id INTEGER NOT NULL REFERENCES readers(id),
                staff_id INTEGER NULL REFERENCES accounts(id) ON DELETE SET NULL,
                request_id INTEGER NULL,
                borrowed_on TEXT NOT NULL,
                due_on TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'DangMuon'
                    CHECK (status IN ('DangMuon','DaTra','QuaHan')),
                renewals INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
        ),
        (
            "borrow_lines",
            r#"CREATE TABLE IF NOT EXISTS borrow_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slip_id INTEGER NOT NULL REFERENCES borrow_slips(id) ON DELETE CASCADE,
                copy_id INTEGER NOT NULL REFERENCES book_copies(id),
                returned INTEGER NOT NULL DEFAULT 0
            )"#,
        ),
        (
            "returns",
            r#"CREATE TABLE IF NOT EXISTS returns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                line_id INTEGER NOT NULL UNIQUE REFERENCES borrow_lines(id) ON DELETE CASCADE,
                returned_on TEXT NOT NULL,
                condition TEXT NOT NULL CHECK (condition IN ('Tot','Hong','Mat')),
                overdue_days INTEGER NOT NULL DEFAULT 0,
                note TEXT NULL,
                staff_id INTEGER NULL REFERENCES accounts(id) ON DELETE SET NULL
            )"#,
        ),
        (
            "payments",
            r#"CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reader_id INTEGER NOT NULL REFERENCES readers(id),
                code TEXT NOT NULL UNIQUE,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'ChoThanhToan'
                    CHECK (status IN ('ChoThanhToan','DaThanhToan','HetHan')),
                qr_url TEXT NOT NULL,
                gateway_ref TEXT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                paid_at TEXT NULL
            )"#,
        ),
        (
            "fines",
            r#"CREATE TABLE IF NOT EXISTS fines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reader_id INTEGER NOT NULL REFERENCES readers(id),
                return_id INTEGER NULL REFERENCES returns(id) ON DELETE SET NULL,
                reason TEXT NOT NULL CHECK (reason IN ('TreHan','HuHong','MatSach')),
                amount INTEGER NOT NULL CHECK (amount > 0),
                status TEXT NOT NULL DEFAULT 'ChuaThanhToan'
                    CHECK (status IN ('ChuaThanhToan','DaThanhToan')),
                created_at TEXT NOT NULL,
                paid_at TEXT NULL,
                payment_id INTEGER NULL REFERENCES payments(id) ON DELETE SET NULL
            )"#,
        ),
        (
            "payment_fines",
            r#"CREATE TABLE IF NOT EXISTS payment_fines (
                payment_id INTEGER NOT NULL REFERENCES payments(id) ON DELETE CASCADE,
                fine_id INTEGER NOT NULL REFERENCES fines(id) ON DELETE CASCADE,
                PRIMARY KEY (payment_id, fine_id)
            )"#,
        ),
        (
            "notifications",
            r#"CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reader_id INTEGER NOT NULL REFERENCES readers(id) ON DELETE CASCADE,
                slip_id INTEGER NULL REFERENCES borrow_slips(id) ON DELETE CASCADE,
                kind TEXT NOT NULL CHECK (kind IN ('SapDenHan','QuaHan')),
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                notify_on TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT NULL
            )"#,
        ),
        (
            "system_config",
            r#"CREATE TABLE IF NOT EXISTS system_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        ),
    ];

    for (name, ddl) in tables {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            tracing::error!("Failed to create table {}: {}", name, e);
            return Err(anyhow::anyhow!("Migration failed for {}: {}", name, e));
        }
    }

    let indexes = [
        ("idx_books_title", "CREATE INDEX IF NOT EXISTS idx_books_title ON books(title)"),
        ("idx_books_author", "CREATE INDEX IF NOT EXISTS idx_books_author ON books(author_id)"),
        ("idx_books_genre", "CREATE INDEX IF NOT EXISTS idx_books_genre ON books(genre_id)"),
        ("idx_books_publisher", "CREATE INDEX IF NOT EXISTS idx_books_publisher ON books(publisher_id)"),
        ("idx_copies_book_status", "CREATE INDEX IF NOT EXISTS idx_copies_book_status ON book_copies(book_id, status)"),
        ("idx_slips_reader_status", "CREATE INDEX IF NOT EXISTS idx_slips_reader_status ON borrow_slips(reader_id, status)"),
        ("idx_slips_status_due", "CREATE INDEX IF NOT EXISTS idx_slips_status_due ON borrow_slips(status, due_on)"),
        ("idx_lines_slip", "CREATE INDEX IF NOT EXISTS idx_lines_slip ON borrow_lines(slip_id)"),
        ("idx_lines_copy", "CREATE INDEX IF NOT EXISTS idx_lines_copy ON borrow_lines(copy_id)"),
        ("idx_requests_status", "CREATE INDEX IF NOT EXISTS idx_requests_status ON borrow_requests(status, created_at)"),
        ("idx_requests_reader", "CREATE INDEX IF NOT EXISTS idx_requests_reader ON borrow_requests(reader_id, status)"),
        ("idx_fines_reader_status", "CREATE INDEX IF NOT EXISTS idx_fines_reader_status ON fines(reader_id, status)"),
        ("idx_payments_status", "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status, expires_at)"),
        ("idx_notifications_slip_day", "CREATE INDEX IF NOT EXISTS idx_notifications_slip_day ON notifications(slip_id, kind, notify_on)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            tracing::warn!("Failed to create index {}: {}", name, e);
        }
    }

    Ok(())
}

/// Inserts missing `system_config` keys and the first Admin account.
///
/// Existing config rows are left untouched so settings changed at runtime survive restarts.
pub async fn seed(pool: &SqlitePool, cfg: &AppConfig) -> anyhow::Result<()> {
    crate::circulation::CirculationPolicy::seed_missing(pool, &cfg.circulation).await?;

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE role = 'Admin'")
        .fetch_one(pool)
        .await?;
    if admins == 0 {
        let username = cfg.auth.bootstrap_admin_username.trim().to_string();
        if username.is_empty() || cfg.auth.bootstrap_admin_password.is_empty() {
            tracing::warn!("No Admin account exists and no bootstrap credentials are configured");
            return Ok(());
        }
        let hash = crate::auth::hash_password(&cfg.auth.bootstrap_admin_password, cfg.auth.bcrypt_cost)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        sqlx::query(
            "INSERT INTO accounts (username, password_hash, role, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
        )
        .bind(&username)
        .bind(hash)
        .bind(Role::Admin)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;
        tracing::info!("Created bootstrap Admin account '{}'", username);
    }
    Ok(())
}
