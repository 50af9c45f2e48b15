use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Datelike;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    error::{validation, AppError, AppResult, OptionExt},
    middleware::CurrentUser,
    state::AppState,
    types::{
        AddCopiesRequest, BookDetail, BookDto, BookInput, BookQuery, CopyDto, CopyStatus, Page, PageQuery,
        UpdateCopyRequest,
    },
};

const BOOK_SELECT: &str = r#"SELECT b.id, b.title, b.author_id, a.name AS author_name,
           b.genre_id, g.name AS genre_name, b.publisher_id, p.name AS publisher_name,
           b.publish_year, b.isbn, b.price, b.description,
           (SELECT COUNT(*) FROM book_copies c WHERE c.book_id = b.id) AS total_copies,
           (SELECT COUNT(*) FROM book_copies c WHERE c.book_id = b.id AND c.status = 'Con') AS available_copies
    FROM books b
    LEFT JOIN authors a ON a.id = b.author_id
    LEFT JOIN genres g ON g.id = b.genre_id
    LEFT JOIN publishers p ON p.id = b.publisher_id"#;

const MAX_COPIES_PER_CALL: i64 = 100;

fn push_book_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, q: &'a BookQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(term) = q.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", term);
        qb.push(" AND (b.title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.isbn LIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(id) = q.author_id {
        qb.push(" AND b.author_id = ").push_bind(id);
    }
    if let Some(id) = q.genre_id {
        qb.push(" AND b.genre_id = ").push_bind(id);
    }
    if let Some(id) = q.publisher_id {
        qb.push(" AND b.publisher_id = ").push_bind(id);
    }
    if q.available_only.unwrap_or(false) {
        qb.push(" AND EXISTS (SELECT 1 FROM book_copies c WHERE c.book_id = b.id AND c.status = 'Con')");
    }
}

pub async fn list_books(State(state): State<AppState>, Query(q): Query<BookQuery>) -> AppResult<Json<Page<BookDto>>> {
    let (page, page_size, offset) = PageQuery { page: q.page, page_size: q.page_size }.resolve();

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM books b LEFT JOIN authors a ON a.id = b.author_id");
    push_book_filters(&mut count, &q);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    let mut items = QueryBuilder::<Sqlite>::new(BOOK_SELECT);
    push_book_filters(&mut items, &q);
    items.push(" ORDER BY b.title, b.id LIMIT ").push_bind(page_size);
    items.push(" OFFSET ").push_bind(offset);
    let items: Vec<BookDto> = items.build_query_as().fetch_all(&state.db).await?;

    Ok(Json(Page { items, total, page, page_size }))
}

async fn fetch_book(conn: &mut SqliteConnection, id: i64) -> AppResult<BookDetail> {
    let book: Option<BookDto> = sqlx::query_as(&format!("{} WHERE b.id = ?1", BOOK_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let book = book.ok_or_not_found("Book")?;
    let copies = sqlx::query_as("SELECT id, book_id, barcode, status FROM book_copies WHERE book_id = ?1 ORDER BY id")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(BookDetail { book, copies })
}

pub async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<BookDetail>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(fetch_book(&mut conn, id).await?))
}

struct BookFields {
    title: String,
    isbn: Option<String>,
    description: Option<String>,
    price: i64,
}

async fn validate_book(conn: &mut SqliteConnection, input: &BookInput) -> AppResult<BookFields> {
    let title = validation::required_text(&input.title, "title", 300)?;
    let isbn = validation::optional_text(input.isbn.as_deref(), "isbn", 20)?;
    if let Some(isbn) = isbn.as_deref() {
        if !isbn.chars().all(|c| c.is_ascii_digit() || c == '-' || c == 'X' || c == 'x') {
            return Err(AppError::ValidationError {
                field: "isbn".to_string(),
                message: "ISBN may only contain digits, '-' and 'X'".to_string(),
            });
        }
    }
    let description = validation::optional_text(input.description.as_deref(), "description", 8000)?;
    validation::validate_non_negative(input.price, "price")?;
    if let Some(year) = input.publish_year {
        let max_year = i64::from(crate::today().year()) + 1;
        if !(0..=max_year).contains(&year) {
            return Err(AppError::ValidationError {
                field: "publish_year".to_string(),
                message: format!("Must be in 0..={}", max_year),
            });
        }
    }

    for (table, id, entity) in [
        ("authors", input.author_id, "Author"),
        ("genres", input.genre_id, "Genre"),
        ("publishers", input.publisher_id, "Publisher"),
    ] {
        if let Some(id) = id {
            let exists: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table))
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
            if exists == 0 {
                return Err(AppError::BadRequest(format!("{} {} does not exist", entity, id)));
            }
        }
    }

    Ok(BookFields { title, isbn, description, price: input.price.unwrap_or(0) })
}

/// Inserts `count` copies numbered after the existing ones: `B000012-003`.
async fn insert_copies(conn: &mut SqliteConnection, book_id: i64, count: i64) -> AppResult<Vec<CopyDto>> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM book_copies WHERE book_id = ?1")
        .bind(book_id)
        .fetch_one(&mut *conn)
        .await?;
    let mut copies = Vec::with_capacity(count as usize);
    for n in existing + 1..=existing + count {
        let barcode = format!("B{:06}-{:03}", book_id, n);
        let id = sqlx::query("INSERT INTO book_copies (book_id, barcode, status) VALUES (?1, ?2, ?3)")
            .bind(book_id)
            .bind(&barcode)
            .bind(CopyStatus::Available)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
        copies.push(CopyDto { id, book_id, barcode, status: CopyStatus::Available });
    }
    Ok(copies)
}

fn validate_copy_count(count: i64, field: &str, min: i64) -> AppResult<()> {
    if !(min..=MAX_COPIES_PER_CALL).contains(&count) {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Must be in {}..={}", min, MAX_COPIES_PER_CALL),
        });
    }
    Ok(())
}

pub async fn create_book(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<BookInput>,
) -> AppResult<(StatusCode, Json<BookDetail>)> {
    user.require_staff()?;
    let copies = input.copies.unwrap_or(1);
    validate_copy_count(copies, "copies", 0)?;

    let mut tx = crate::db::begin_write(&state.db).await?;
    let f = validate_book(&mut tx, &input).await?;
    let id = sqlx::query(
        r#"INSERT INTO books (title, author_id, genre_id, publisher_id, publish_year, isbn, price, description, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
    )
    .bind(&f.title)
    .bind(input.author_id)
    .bind(input.genre_id)
    .bind(input.publisher_id)
    .bind(input.publish_year)
    .bind(&f.isbn)
    .bind(f.price)
    .bind(&f.description)
    .bind(chrono::Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    insert_copies(&mut tx, id, copies).await?;
    let book = fetch_book(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(book_id = id, copies, "Book '{}' added", f.title);
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<BookInput>,
) -> AppResult<Json<BookDetail>> {
    user.require_staff()?;
    let mut tx = crate::db::begin_write(&state.db).await?;
    let f = validate_book(&mut tx, &input).await?;
    let res = sqlx::query(
        r#"UPDATE books
           SET title = ?1, author_id = ?2, genre_id = ?3, publisher_id = ?4, publish_year = ?5,
               isbn = ?6, price = ?7, description = ?8
           WHERE id = ?9"#,
    )
    .bind(&f.title)
    .bind(input.author_id)
    .bind(input.genre_id)
    .bind(input.publisher_id)
    .bind(input.publish_year)
    .bind(&f.isbn)
    .bind(f.price)
    .bind(&f.description)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }
    let book = fetch_book(&mut tx, id).await?;
    tx.commit().await?;
    Ok(Json(book))
}

/// A book whose copies were ever borrowed or requested keeps its history and
/// cannot be deleted.
pub async fn delete_book(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    let mut tx = crate::db::begin_write(&state.db).await?;
    let used: i64 = sqlx::query_scalar(
        r#"SELECT
             (SELECT COUNT(*) FROM borrow_lines l JOIN book_copies c ON c.id = l.copy_id WHERE c.book_id = ?1)
           + (SELECT COUNT(*) FROM borrow_requests q JOIN book_copies c ON c.id = q.copy_id WHERE c.book_id = ?1)"#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if used > 0 {
        return Err(AppError::Conflict(format!("Book {} has borrowing history and cannot be deleted", id)));
    }
    let res = sqlx::query("DELETE FROM books WHERE id = ?1").bind(id).execute(&mut *tx).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }
    tx.commit().await?;
    tracing::info!(book_id = id, "Book deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_copies(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<AddCopiesRequest>,
) -> AppResult<(StatusCode, Json<Vec<CopyDto>>)> {
    user.require_staff()?;
    validate_copy_count(req.count, "count", 1)?;
    let mut tx = crate::db::begin_write(&state.db).await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM books WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    exists.ok_or_not_found("Book")?;
    let copies = insert_copies(&mut tx, id, req.count).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(copies)))
}

/// Staff toggle between Con, Hong and Mat. DangMuon belongs to the circulation desk.
pub async fn update_copy(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCopyRequest>,
) -> AppResult<Json<CopyDto>> {
    user.require_staff()?;
    if req.status == CopyStatus::Borrowed {
        return Err(AppError::BadRequest("Copies are lent through a borrow slip, not by status".to_string()));
    }
    let res = sqlx::query("UPDATE book_copies SET status = ?1 WHERE id = ?2 AND status <> 'DangMuon'")
        .bind(req.status)
        .bind(id)
        .execute(&state.db)
        .await?;
    let copy: Option<CopyDto> = sqlx::query_as("SELECT id, book_id, barcode, status FROM book_copies WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    let copy = copy.ok_or_not_found("Copy")?;
    if res.rows_affected() == 0 {
        return Err(AppError::BadRequest(format!("Copy {} is currently borrowed", copy.barcode)));
    }
    Ok(Json(copy))
}
