//! HTTP route handlers for the Thuvien API.
//!
//! Each sub-module handles one area of the library:
//!
//! - `auth`: login, self-registration, password change
//! - `accounts`: staff administration of login accounts
//! - `catalog`: authors, genres and publishers
//! - `books`: titles and their physical copies
//! - `readers`: reader profiles and borrowing history
//! - `borrow`: desk loans, returns and renewals
//! - `requests`: reader borrow requests and their approval
//! - `fines` / `payments`: fines and SePay QR payments
//! - `me`: reader self-service views
//! - `stats` / `export`: dashboards and spreadsheet exports
//! - `settings`: circulation policy and the manual job trigger
//! - `health`: probes, metrics and build info

pub mod accounts;
pub mod auth;
pub mod books;
pub mod borrow;
pub mod catalog;
pub mod export;
pub mod fines;
pub mod health;
pub mod me;
pub mod payments;
pub mod readers;
pub mod requests;
pub mod settings;
pub mod stats;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

/// Builds the full route table. Middleware layers are added by the caller.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        .route("/accounts", get(accounts::list_accounts).post(accounts::create_account))
        .route(
            "/accounts/{id}",
            get(accounts::get_account).put(accounts::update_account).delete(accounts::delete_account),
        )
        .route("/authors", get(catalog::list_authors).post(catalog::create_author))
        .route(
            "/authors/{id}",
            get(catalog::get_author).put(catalog::update_author).delete(catalog::delete_author),
        )
        .route("/genres", get(catalog::list_genres).post(catalog::create_genre))
        .route("/genres/{id}", get(catalog::get_genre).put(catalog::update_genre).delete(catalog::delete_genre))
        .route("/publishers", get(catalog::list_publishers).post(catalog::create_publisher))
        .route(
            "/publishers/{id}",
            get(catalog::get_publisher).put(catalog::update_publisher).delete(catalog::delete_publisher),
        )
        .route("/books", get(books::list_books).post(books::create_book))
        .route("/books/{id}", get(books::get_book).put(books::update_book).delete(books::delete_book))
        .route("/books/{id}/copies", post(books::add_copies))
        .route("/copies/{id}", put(books::update_copy))
        .route("/readers", get(readers::list_readers).post(readers::create_reader))
        .route(
            "/readers/{id}",
            get(readers::get_reader).put(readers::update_reader).delete(readers::delete_reader),
        )
        .route("/readers/{id}/history", get(readers::reader_history))
        .route("/borrow", get(borrow::list_borrows).post(borrow::create_borrow))
        .route("/borrow/overdue", get(borrow::list_overdue))
        .route("/borrow/{id}", get(borrow::get_borrow))
        .route("/borrow/{id}/return", post(borrow::return_borrow))
        .route("/borrow/{id}/renew", post(borrow::renew_borrow))
        .route("/requests", get(requests::list_requests).post(requests::create_request))
        .route("/requests/{id}", get(requests::get_request).delete(requests::cancel_request))
        .route("/requests/{id}/approve", post(requests::approve_request))
        .route("/requests/{id}/reject", post(requests::reject_request))
        .route("/fines", get(fines::list_fines))
        .route("/fines/{id}/pay", post(fines::pay_fine))
        .route("/payments", get(payments::list_payments).post(payments::create_payment))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/me", get(me::my_profile))
        .route("/me/loans", get(me::my_loans))
        .route("/me/fines", get(me::my_fines))
        .route("/me/requests", get(me::my_requests))
        .route("/me/notifications", get(me::my_notifications))
        .route("/stats/dashboard", get(stats::dashboard))
        .route("/stats/top-books", get(stats::top_books))
        .route("/stats/monthly", get(stats::monthly))
        .route("/export/{kind}", get(export::export))
        .route("/settings", get(settings::get_settings).put(settings::update_settings))
        .route("/jobs/run", post(settings::run_jobs));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .nest("/api", api)
        .with_state(state)
}
