//! Authors, genres and publishers.
//!
//! Reads are public so the catalog can be browsed without an account; writes need
//! a staff role. A row that is still referenced by a book cannot be deleted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::SqlitePool;

use crate::{
    error::{validation, AppError, AppResult, OptionExt},
    middleware::CurrentUser,
    state::AppState,
    types::{AuthorDto, AuthorInput, GenreDto, GenreInput, PublisherDto, PublisherInput, SearchQuery},
};

const AUTHOR_SELECT: &str = r#"SELECT a.id, a.name, a.biography,
           (SELECT COUNT(*) FROM books b WHERE b.author_id = a.id) AS book_count
    FROM authors a"#;
const GENRE_SELECT: &str = r#"SELECT g.id, g.name, g.description,
           (SELECT COUNT(*) FROM books b WHERE b.genre_id = g.id) AS book_count
    FROM genres g"#;
const PUBLISHER_SELECT: &str = r#"SELECT p.id, p.name, p.address, p.phone, p.email,
           (SELECT COUNT(*) FROM books b WHERE b.publisher_id = p.id) AS book_count
    FROM publishers p"#;

fn like_pattern(q: &SearchQuery) -> String {
    format!("%{}%", q.q.as_deref().map(str::trim).unwrap_or(""))
}

/// Deletes `id` from `table` unless a book still points at it through `book_column`.
async fn delete_unreferenced(
    pool: &SqlitePool,
    table: &'static str,
    book_column: &'static str,
    id: i64,
    entity: &str,
) -> AppResult<StatusCode> {
    let mut tx = crate::db::begin_write(pool).await?;
    let books: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM books WHERE {} = ?1", book_column))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if books > 0 {
        return Err(AppError::Conflict(format!("{} {} is still used by {} book(s)", entity, id, books)));
    }
    let res = sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", table)).bind(id).execute(&mut *tx).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("{} not found", entity)));
    }
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

// Authors

async fn fetch_author(pool: &SqlitePool, id: i64) -> AppResult<AuthorDto> {
    let author: Option<AuthorDto> = sqlx::query_as(&format!("{} WHERE a.id = ?1", AUTHOR_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    author.ok_or_not_found("Author")
}

pub async fn list_authors(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<AuthorDto>>> {
    let authors = sqlx::query_as(&format!("{} WHERE a.name LIKE ?1 ORDER BY a.name", AUTHOR_SELECT))
        .bind(like_pattern(&q))
        .fetch_all(&state.db)
        .await?;
    Ok(Json(authors))
}

pub async fn get_author(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<AuthorDto>> {
    Ok(Json(fetch_author(&state.db, id).await?))
}

pub async fn create_author(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<AuthorInput>,
) -> AppResult<(StatusCode, Json<AuthorDto>)> {
    user.require_staff()?;
    let name = validation::required_text(&input.name, "name", 150)?;
    let biography = validation::optional_text(input.biography.as_deref(), "biography", 4000)?;
    let id = sqlx::query("INSERT INTO authors (name, biography, created_at) VALUES (?1, ?2, ?3)")
        .bind(&name)
        .bind(&biography)
        .bind(chrono::Utc::now())
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    Ok((StatusCode::CREATED, Json(fetch_author(&state.db, id).await?)))
}

pub async fn update_author(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<AuthorInput>,
) -> AppResult<Json<AuthorDto>> {
    user.require_staff()?;
    let name = validation::required_text(&input.name, "name", 150)?;
    let biography = validation::optional_text(input.biography.as_deref(), "biography", 4000)?;
    let res = sqlx::query("UPDATE authors SET name = ?1, biography = ?2 WHERE id = ?3")
        .bind(&name)
        .bind(&biography)
        .bind(id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Author not found".to_string()));
    }
    Ok(Json(fetch_author(&state.db, id).await?))
}

pub async fn delete_author(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    delete_unreferenced(&state.db, "authors", "author_id", id, "Author").await
}

// Genres

async fn fetch_genre(pool: &SqlitePool, id: i64) -> AppResult<GenreDto> {
    let genre: Option<GenreDto> = sqlx::query_as(&format!("{} WHERE g.id = ?1", GENRE_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    genre.ok_or_not_found("Genre")
}

pub async fn list_genres(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<GenreDto>>> {
    let genres = sqlx::query_as(&format!("{} WHERE g.name LIKE ?1 ORDER BY g.name", GENRE_SELECT))
        .bind(like_pattern(&q))
        .fetch_all(&state.db)
        .await?;
    Ok(Json(genres))
}

pub async fn get_genre(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<GenreDto>> {
    Ok(Json(fetch_genre(&state.db, id).await?))
}

pub async fn create_genre(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<GenreInput>,
) -> AppResult<(StatusCode, Json<GenreDto>)> {
    user.require_staff()?;
    let name = validation::required_text(&input.name, "name", 100)?;
    let description = validation::optional_text(input.description.as_deref(), "description", 2000)?;
    let id = sqlx::query("INSERT INTO genres (name, description) VALUES (?1, ?2)")
        .bind(&name)
        .bind(&description)
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    Ok((StatusCode::CREATED, Json(fetch_genre(&state.db, id).await?)))
}

pub async fn update_genre(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<GenreInput>,
) -> AppResult<Json<GenreDto>> {
    user.require_staff()?;
    let name = validation::required_text(&input.name, "name", 100)?;
    let description = validation::optional_text(input.description.as_deref(), "description", 2000)?;
    let res = sqlx::query("UPDATE genres SET name = ?1, description = ?2 WHERE id = ?3")
        .bind(&name)
        .bind(&description)
        .bind(id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Genre not found".to_string()));
    }
    Ok(Json(fetch_genre(&state.db, id).await?))
}

pub async fn delete_genre(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    delete_unreferenced(&state.db, "genres", "genre_id", id, "Genre").await
}

// Publishers

struct PublisherFields {
    name: String,
    address: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

fn publisher_fields(input: &PublisherInput) -> AppResult<PublisherFields> {
    validation::validate_email(input.email.as_deref())?;
    Ok(PublisherFields {
        name: validation::required_text(&input.name, "name", 150)?,
        address: validation::optional_text(input.address.as_deref(), "address", 300)?,
        phone: validation::optional_text(input.phone.as_deref(), "phone", 30)?,
        email: validation::optional_text(input.email.as_deref(), "email", 150)?,
    })
}

async fn fetch_publisher(pool: &SqlitePool, id: i64) -> AppResult<PublisherDto> {
    let publisher: Option<PublisherDto> = sqlx::query_as(&format!("{} WHERE p.id = ?1", PUBLISHER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    publisher.ok_or_not_found("Publisher")
}

pub async fn list_publishers(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<PublisherDto>>> {
    let publishers = sqlx::query_as(&format!("{} WHERE p.name LIKE ?1 ORDER BY p.name", PUBLISHER_SELECT))
        .bind(like_pattern(&q))
        .fetch_all(&state.db)
        .await?;
    Ok(Json(publishers))
}

pub async fn get_publisher(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<PublisherDto>> {
    Ok(Json(fetch_publisher(&state.db, id).await?))
}

pub async fn create_publisher(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<PublisherInput>,
) -> AppResult<(StatusCode, Json<PublisherDto>)> {
    user.require_staff()?;
    let f = publisher_fields(&input)?;
    let id = sqlx::query("INSERT INTO publishers (name, address, phone, email) VALUES (?1, ?2, ?3, ?4)")
        .bind(&f.name)
        .bind(&f.address)
        .bind(&f.phone)
        .bind(&f.email)
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    Ok((StatusCode::CREATED, Json(fetch_publisher(&state.db, id).await?)))
}

pub async fn update_publisher(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<PublisherInput>,
) -> AppResult<Json<PublisherDto>> {
    user.require_staff()?;
    let f = publisher_fields(&input)?;
    let res = sqlx::query("UPDATE publishers SET name = ?1, address = ?2, phone = ?3, email = ?4 WHERE id = ?5")
        .bind(&f.name)
        .bind(&f.address)
        .bind(&f.phone)
        .bind(&f.email)
        .bind(id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Publisher not found".to_string()));
    }
    Ok(Json(fetch_publisher(&state.db, id).await?))
}

pub async fn delete_publisher(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    delete_unreferenced(&state.db, "publishers", "publisher_id", id, "Publisher").await
}
