use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Status words are stored and serialized exactly as the library staff use them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum Role {
    Admin,
    #[serde(rename = "ThuThu")]
    #[sqlx(rename = "ThuThu")]
    Librarian,
    #[serde(rename = "DocGia")]
    #[sqlx(rename = "DocGia")]
    Reader,
}

impl Role {
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Librarian)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Librarian => "ThuThu",
            Role::Reader => "DocGia",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum CopyStatus {
    #[serde(rename = "Con")]
    #[sqlx(rename = "Con")]
    Available,
    #[serde(rename = "DangMuon")]
    #[sqlx(rename = "DangMuon")]
    Borrowed,
    #[serde(rename = "Hong")]
    #[sqlx(rename = "Hong")]
    Damaged,
    #[serde(rename = "Mat")]
    #[sqlx(rename = "Mat")]
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum SlipStatus {
    #[serde(rename = "DangMuon")]
    #[sqlx(rename = "DangMuon")]
    Open,
    #[serde(rename = "DaTra")]
    #[sqlx(rename = "DaTra")]
    Returned,
    #[serde(rename = "QuaHan")]
    #[sqlx(rename = "QuaHan")]
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum RequestStatus {
    #[serde(rename = "ChoXuLy")]
    #[sqlx(rename = "ChoXuLy")]
    Pending,
    #[serde(rename = "DaDuyet")]
    #[sqlx(rename = "DaDuyet")]
    Approved,
    #[serde(rename = "TuChoi")]
    #[sqlx(rename = "TuChoi")]
    Rejected,
    #[serde(rename = "DaHuy")]
    #[sqlx(rename = "DaHuy")]
    Cancelled,
}

/// Condition of a copy when it comes back to the desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ReturnCondition {
    #[serde(rename = "Tot")]
    #[sqlx(rename = "Tot")]
    Good,
    #[serde(rename = "Hong")]
    #[sqlx(rename = "Hong")]
    Damaged,
    #[serde(rename = "Mat")]
    #[sqlx(rename = "Mat")]
    Lost,
}

impl ReturnCondition {
    pub fn copy_status(self) -> CopyStatus {
        match self {
            ReturnCondition::Good => CopyStatus::Available,
            ReturnCondition::Damaged => CopyStatus::Damaged,
            ReturnCondition::Lost => CopyStatus::Lost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum FineReason {
    #[serde(rename = "TreHan")]
    #[sqlx(rename = "TreHan")]
    Late,
    #[serde(rename = "HuHong")]
    #[sqlx(rename = "HuHong")]
    Damaged,
    #[serde(rename = "MatSach")]
    #[sqlx(rename = "MatSach")]
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum FineStatus {
    #[serde(rename = "ChuaThanhToan")]
    #[sqlx(rename = "ChuaThanhToan")]
    Unpaid,
    #[serde(rename = "DaThanhToan")]
    #[sqlx(rename = "DaThanhToan")]
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum PaymentStatus {
    #[serde(rename = "ChoThanhToan")]
    #[sqlx(rename = "ChoThanhToan")]
    Pending,
    #[serde(rename = "DaThanhToan")]
    #[sqlx(rename = "DaThanhToan")]
    Paid,
    #[serde(rename = "HetHan")]
    #[sqlx(rename = "HetHan")]
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum NotificationKind {
    #[serde(rename = "SapDenHan")]
    #[sqlx(rename = "SapDenHan")]
    DueSoon,
    #[serde(rename = "QuaHan")]
    #[sqlx(rename = "QuaHan")]
    Overdue,
}

// Shared list wrapper

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    /// Returns (page, page_size, offset) with page in 1..=MAX_PAGE and page_size in 1..=100.
    pub fn resolve(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, Self::MAX_PAGE);
        let page_size = self.page_size.unwrap_or(20).clamp(1, 100);
        (page, page_size, (page - 1) * page_size)
    }

    /// Far beyond any real catalog; keeps the offset well inside `i64`.
    pub const MAX_PAGE: i64 = 1_000_000;
}

// Accounts

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountDto {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub active: bool,
    pub reader_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAccountRequest {
    pub password: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub account: AccountDto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// Catalog

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorDto {
    pub id: i64,
    pub name: String,
    pub biography: Option<String>,
    pub book_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorInput {
    pub name: String,
    pub biography: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenreDto {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub book_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreInput {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PublisherDto {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub book_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherInput {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookDto {
    pub id: i64,
    pub title: String,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub genre_id: Option<i64>,
    pub genre_name: Option<String>,
    pub publisher_id: Option<i64>,
    pub publisher_name: Option<String>,
    pub publish_year: Option<i64>,
    pub isbn: Option<String>,
    pub price: i64,
    pub description: Option<String>,
    pub total_copies: i64,
    pub available_copies: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CopyDto {
    pub id: i64,
    pub book_id: i64,
    pub barcode: String,
    pub status: CopyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub book: BookDto,
    pub copies: Vec<CopyDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookInput {
    pub title: String,
    pub author_id: Option<i64>,
    pub genre_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub publish_year: Option<i64>,
    pub isbn: Option<String>,
    pub price: Option<i64>,
    pub description: Option<String>,
    /// Only honoured on create.
    pub copies: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookQuery {
    pub q: Option<String>,
    pub author_id: Option<i64>,
    pub genre_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub available_only: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddCopiesRequest {
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCopyRequest {
    pub status: CopyStatus,
}

// Readers

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReaderDto {
    pub id: i64,
    pub account_id: Option<i64>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub card_expires_on: Option<NaiveDate>,
    pub active_loans: i64,
    pub unpaid_fines: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderInput {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub card_expires_on: Option<NaiveDate>,
    pub account_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// Circulation

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlipLineDto {
    pub id: i64,
    pub copy_id: i64,
    pub barcode: String,
    pub book_id: i64,
    pub title: String,
    pub returned: bool,
    pub returned_on: Option<NaiveDate>,
    pub condition: Option<ReturnCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlipSummary {
    pub id: i64,
    pub reader_id: i64,
    pub reader_name: String,
    pub staff_id: Option<i64>,
    pub request_id: Option<i64>,
    pub borrowed_on: NaiveDate,
    pub due_on: NaiveDate,
    pub status: SlipStatus,
    pub renewals: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipDto {
    #[serde(flatten)]
    pub slip: SlipSummary,
    pub lines: Vec<SlipLineDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueSlip {
    #[serde(flatten)]
    pub slip: SlipSummary,
    pub overdue_days: i64,
    pub open_lines: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BorrowRequest {
    pub reader_id: i64,
    pub copy_ids: Vec<i64>,
    pub loan_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlipQuery {
    pub status: Option<SlipStatus>,
    pub reader_id: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnItem {
    pub line_id: i64,
    pub condition: ReturnCondition,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnRequest {
    pub items: Vec<ReturnItem>,
    /// Defaults to today. Staff may back-date a return that was dropped in the box.
    pub returned_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReturnDto {
    pub id: i64,
    pub line_id: i64,
    pub returned_on: NaiveDate,
    pub condition: ReturnCondition,
    pub overdue_days: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub slip_id: i64,
    pub slip_status: SlipStatus,
    pub returns: Vec<ReturnDto>,
    pub fines: Vec<FineDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FineDto {
    pub id: i64,
    pub reader_id: i64,
    pub return_id: Option<i64>,
    pub reason: FineReason,
    pub amount: i64,
    pub status: FineStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FineQuery {
    pub status: Option<FineStatus>,
    pub reader_id: Option<i64>,
}

// Requests

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestDto {
    pub id: i64,
    pub reader_id: i64,
    pub reader_name: String,
    pub copy_id: i64,
    pub barcode: String,
    pub book_id: i64,
    pub title: String,
    pub loan_days: i64,
    pub status: RequestStatus,
    pub note: Option<String>,
    pub reject_reason: Option<String>,
    pub processed_by: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
    pub slip_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBorrowRequest {
    pub copy_id: i64,
    pub loan_days: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestQuery {
    pub status: Option<RequestStatus>,
    pub reader_id: Option<i64>,
}

// Payments

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentDto {
    pub id: i64,
    pub reader_id: i64,
    pub code: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub qr_url: String,
    pub gateway_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePaymentRequest {
    pub fine_ids: Option<Vec<i64>>,
    pub reader_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentQuery {
    pub reader_id: Option<i64>,
}

// Notifications

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationDto {
    pub id: i64,
    pub reader_id: i64,
    pub slip_id: Option<i64>,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub notify_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}
