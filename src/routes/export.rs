use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use rust_xlsxwriter::{Format, Workbook};
use serde::Deserialize;
use sqlx::{sqlite::SqliteRow, Row};

use crate::{
    error::{AppError, AppResult},
    middleware::CurrentUser,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// `xlsx` (default) or `csv`
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Books,
    Readers,
    Borrows,
    Fines,
}

impl ExportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "books" => Some(Self::Books),
            "readers" => Some(Self::Readers),
            "borrows" => Some(Self::Borrows),
            "fines" => Some(Self::Fines),
            _ => None,
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            Self::Books => "sach",
            Self::Readers => "doc_gia",
            Self::Borrows => "phieu_muon",
            Self::Fines => "tien_phat",
        }
    }

    fn sheet_name(self) -> &'static str {
        match self {
            Self::Books => "Sach",
            Self::Readers => "DocGia",
            Self::Borrows => "PhieuMuon",
            Self::Fines => "TienPhat",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(i64),
}

impl Cell {
    fn text(row: &SqliteRow, col: &str) -> sqlx::Result<Self> {
        Ok(Cell::Text(row.try_get::<Option<String>, _>(col)?.unwrap_or_default()))
    }

    fn number(row: &SqliteRow, col: &str) -> sqlx::Result<Self> {
        Ok(Cell::Number(row.try_get::<Option<i64>, _>(col)?.unwrap_or(0)))
    }
}

/// Header row plus data rows of one export.
#[derive(Debug, Default)]
pub struct Table {
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

pub async fn export(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(kind): Path<String>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    user.require_staff()?;
    let kind = ExportKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("Unknown export '{}'", kind)))?;
    let format = query.format.as_deref().unwrap_or("xlsx");

    let table = load_table(&state.db, kind).await?;
    tracing::info!("Exporting {} rows of {:?} as {}", table.rows.len(), kind, format);

    let (body, content_type, ext) = match format {
        "csv" => (to_csv(&table).into_bytes(), "text/csv; charset=utf-8", "csv"),
        "xlsx" => (
            to_xlsx(&table, kind.sheet_name())?,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
        ),
        _ => return Err(AppError::BadRequest("Invalid format. Use 'xlsx' or 'csv'".to_string())),
    };

    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    let filename = format!("attachment; filename=\"{}_{}.{}\"", kind.file_stem(), crate::today(), ext);
    if let Ok(header_val) = HeaderValue::from_str(&filename) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, header_val);
    }
    Ok(response)
}

/// (header, column, numeric) per exported column.
type Columns = &'static [(&'static str, &'static str, bool)];

const BOOK_COLUMNS: Columns = &[
    ("Mã sách", "id", true),
    ("Tên sách", "title", false),
    ("Tác giả", "author", false),
    ("Thể loại", "genre", false),
    ("Nhà xuất bản", "publisher", false),
    ("Năm XB", "publish_year", true),
    ("ISBN", "isbn", false),
    ("Giá", "price", true),
    ("Số bản", "copies", true),
    ("Còn", "available", true),
];

const READER_COLUMNS: Columns = &[
    ("Mã độc giả", "id", true),
    ("Họ tên", "full_name", false),
    ("Email", "email", false),
    ("Điện thoại", "phone", false),
    ("Địa chỉ", "address", false),
    ("Hạn thẻ", "card_expires_on", false),
];

const BORROW_COLUMNS: Columns = &[
    ("Mã phiếu", "id", true),
    ("Độc giả", "full_name", false),
    ("Ngày mượn", "borrowed_on", false),
    ("Hạn trả", "due_on", false),
    ("Trạng thái", "status", false),
    ("Gia hạn", "renewals", true),
    ("Số sách", "lines", true),
];

const FINE_COLUMNS: Columns = &[
    ("Mã phạt", "id", true),
    ("Độc giả", "full_name", false),
    ("Lý do", "reason", false),
    ("Số tiền", "amount", true),
    ("Trạng thái", "status", false),
    ("Ngày lập", "created_at", false),
    ("Ngày thanh toán", "paid_at", false),
];

pub async fn load_table(pool: &sqlx::SqlitePool, kind: ExportKind) -> AppResult<Table> {
    let (sql, columns) = match kind {
        ExportKind::Books => (
            r#"SELECT b.id, b.title, a.name AS author, g.name AS genre, p.name AS publisher,
                      b.publish_year, b.isbn, b.price,
                      (SELECT COUNT(*) FROM book_copies c WHERE c.book_id = b.id) AS copies,
                      (SELECT COUNT(*) FROM book_copies c WHERE c.book_id = b.id AND c.status = 'Con') AS available
               FROM books b
               LEFT JOIN authors a ON a.id = b.author_id
               LEFT JOIN genres g ON g.id = b.genre_id
               LEFT JOIN publishers p ON p.id = b.publisher_id
               ORDER BY b.id"#,
            BOOK_COLUMNS,
        ),
        ExportKind::Readers => (
            "SELECT id, full_name, email, phone, address, card_expires_on FROM readers ORDER BY id",
            READER_COLUMNS,
        ),
        ExportKind::Borrows => (
            r#"SELECT s.id, r.full_name, s.borrowed_on, s.due_on, s.status, s.renewals,
                      (SELECT COUNT(*) FROM borrow_lines l WHERE l.slip_id = s.id) AS lines
               FROM borrow_slips s
               JOIN readers r ON r.id = s.reader_id
               ORDER BY s.id"#,
            BORROW_COLUMNS,
        ),
        ExportKind::Fines => (
            r#"SELECT f.id, r.full_name, f.reason, f.amount, f.status, f.created_at, f.paid_at
               FROM fines f
               JOIN readers r ON r.id = f.reader_id
               ORDER BY f.id"#,
            FINE_COLUMNS,
        ),
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|&(_, col, numeric)| if numeric { Cell::number(row, col) } else { Cell::text(row, col) })
                .collect::<sqlx::Result<Vec<Cell>>>()
        })
        .collect::<sqlx::Result<Vec<_>>>()?;
    Ok(Table { headers: columns.iter().map(|&(header, _, _)| header).collect(), rows })
}

pub fn to_csv(table: &Table) -> String {
    let mut out = String::new();
    let header: Vec<String> = table.headers.iter().map(|h| format!("\"{}\"", escape_csv(h))).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &table.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|c| match c {
                Cell::Text(s) => format!("\"{}\"", escape_csv(s)),
                Cell::Number(n) => n.to_string(),
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

pub fn to_xlsx(table: &Table, sheet: &str) -> AppResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet)?;
    let bold = Format::new().set_bold();

    for (col, title) in table.headers.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *title, &bold)?;
        worksheet.set_column_width(col, 18)?;
    }
    for (i, row) in table.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(s) => worksheet.write_string(r, col, s.as_str())?,
                Cell::Number(n) => worksheet.write_number(r, col, *n as f64)?,
            };
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn escape_csv(s: &str) -> String {
    // quotes are doubled, line breaks and control chars become spaces
    s.chars()
        .flat_map(|c| match c {
            '"' => vec!['"', '"'],
            '\n' | '\r' => vec![' '],
            c if c.is_control() => vec![' '],
            c => vec![c],
        })
        .collect()
}
