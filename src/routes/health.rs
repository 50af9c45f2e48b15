use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness probe, no database access
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: database must answer within five seconds
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

/// Prometheus text exposition of the same counters.
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 11] = [
        ("thuvien_loans_opened", "counter", "Borrow slips opened", m.loans_opened),
        ("thuvien_copies_lent", "counter", "Copies handed out", m.copies_lent),
        ("thuvien_returns_processed", "counter", "Copies returned", m.returns_processed),
        ("thuvien_fines_issued", "counter", "Fines issued", m.fines_issued),
        ("thuvien_fine_amount_issued", "counter", "Fine amount issued in VND", m.fine_amount_issued),
        ("thuvien_requests_approved", "counter", "Borrow requests approved", m.requests_approved),
        ("thuvien_requests_rejected", "counter", "Borrow requests rejected", m.requests_rejected),
        ("thuvien_payments_confirmed", "counter", "QR payments confirmed", m.payments_confirmed),
        ("thuvien_reminders_queued", "counter", "Reminders queued", m.reminders_queued),
        ("thuvien_job_runs", "counter", "Daily job runs", m.job_runs),
        ("thuvien_uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];
    let mut body = String::new();
    for (name, kind, help, value) in series {
        body.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"));
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
