use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Circulation counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub loans_opened: Arc<AtomicU64>,
    pub copies_lent: Arc<AtomicU64>,
    pub returns_processed: Arc<AtomicU64>,
    pub fines_issued: Arc<AtomicU64>,
    pub fine_amount_issued: Arc<AtomicU64>,
    pub requests_approved: Arc<AtomicU64>,
    pub requests_rejected: Arc<AtomicU64>,
    pub payments_confirmed: Arc<AtomicU64>,
    pub reminders_queued: Arc<AtomicU64>,
    pub job_runs: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            loans_opened: Arc::new(AtomicU64::new(0)),
            copies_lent: Arc::new(AtomicU64::new(0)),
            returns_processed: Arc::new(AtomicU64::new(0)),
            fines_issued: Arc::new(AtomicU64::new(0)),
            fine_amount_issued: Arc::new(AtomicU64::new(0)),
            requests_approved: Arc::new(AtomicU64::new(0)),
            requests_rejected: Arc::new(AtomicU64::new(0)),
            payments_confirmed: Arc::new(AtomicU64::new(0)),
            reminders_queued: Arc::new(AtomicU64::new(0)),
            job_runs: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_loan(&self, copies: u64) {
        self.loans_opened.fetch_add(1, Ordering::Relaxed);
        self.copies_lent.fetch_add(copies, Ordering::Relaxed);
    }

    pub fn add_returns(&self, count: u64) {
        self.returns_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fine(&self, amount: i64) {
        self.fines_issued.fetch_add(1, Ordering::Relaxed);
        self.fine_amount_issued.fetch_add(amount.max(0) as u64, Ordering::Relaxed);
    }

    pub fn inc_requests_approved(&self) {
        self.requests_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_payments_confirmed(&self) {
        self.payments_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reminders(&self, count: u64) {
        self.reminders_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_job_runs(&self) {
        self.job_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loans_opened: self.loans_opened.load(Ordering::Relaxed),
            copies_lent: self.copies_lent.load(Ordering::Relaxed),
            returns_processed: self.returns_processed.load(Ordering::Relaxed),
            fines_issued: self.fines_issued.load(Ordering::Relaxed),
            fine_amount_issued: self.fine_amount_issued.load(Ordering::Relaxed),
            requests_approved: self.requests_approved.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            payments_confirmed: self.payments_confirmed.load(Ordering::Relaxed),
            reminders_queued: self.reminders_queued.load(Ordering::Relaxed),
            job_runs: self.job_runs.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub loans_opened: u64,
    pub copies_lent: u64,
    pub returns_processed: u64,
    pub fines_issued: u64,
    pub fine_amount_issued: u64,
    pub requests_approved: u64,
    pub requests_rejected: u64,
    pub payments_confirmed: u64,
    pub reminders_queued: u64,
    pub job_runs: u64,
    pub uptime_seconds: u64,
}
