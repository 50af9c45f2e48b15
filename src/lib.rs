//! # Thuvien Backend Library
//!
//! Core library of Thuvien, a library management backend. It keeps the catalog
//! of titles and physical copies, runs the circulation desk (borrow requests,
//! slips, returns, renewals) and collects fines either at the desk or through
//! SePay bank-transfer QR codes.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server and routing
//! - **SQLx**: asynchronous SQLite access
//! - **Tokio**: async runtime and the daily background job
//! - **Hyper**: HTTPS client for the SePay transaction API
//!
//! ## Core Components
//!
//! - [`auth`]: password hashing and JWT issuing
//! - [`circulation`]: loan rules, fines and the borrow workflow
//! - [`config`]: layered application configuration
//! - [`db`]: schema initialization and first-start seeding
//! - [`error`]: error type and HTTP error responses
//! - [`jobs`]: overdue sweep, reminders and payment expiry
//! - [`metrics`]: in-process counters
//! - [`middleware`]: authentication, rate limiting, request validation, security headers
//! - [`notify`]: reader reminders and the notification outbox
//! - [`payment`]: fine payments and the SePay gateway
//! - [`routes`]: HTTP API endpoint handlers
//! - [`state`]: shared application state
//! - [`types`]: data transfer objects and status enums

pub mod auth;
pub mod circulation;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod notify;
pub mod payment;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

/// The library's business day in local time. Due dates and overdue checks use it.
pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}
