//! Daily housekeeping: overdue flags, reminders, stale payments.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::circulation::{overdue, CirculationPolicy};
use crate::error::AppResult;
use crate::notify::Reminder;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyReport {
    pub run_on: Option<NaiveDate>,
    pub slips_marked_overdue: u64,
    pub due_soon_queued: u64,
    pub overdue_queued: u64,
    pub payments_expired: u64,
    pub delivery_failures: u64,
}

/// One pass of the daily job. Safe to run more than once per day: reminders are
/// deduplicated per slip, kind and day by the sink.
pub async fn run_daily(state: &AppState, today: NaiveDate, now: DateTime<Utc>) -> AppResult<DailyReport> {
    let policy = CirculationPolicy::load(&state.db).await?;
    let mut report = DailyReport { run_on: Some(today), ..Default::default() };

    report.slips_marked_overdue = overdue::mark_overdue(&state.db, today).await?;

    let mut reminders = Vec::new();
    for target in overdue::due_soon(&state.db, today, policy.reminder_days_before).await? {
        reminders.push(Reminder::due_soon(&target, today));
    }
    for target in overdue::overdue(&state.db).await? {
        reminders.push(Reminder::overdue(&target, today));
    }

    for reminder in &reminders {
        match state.reminders.deliver(reminder).await {
            Ok(true) => match reminder.kind {
                crate::types::NotificationKind::DueSoon => report.due_soon_queued += 1,
                crate::types::NotificationKind::Overdue => report.overdue_queued += 1,
            },
            Ok(false) => {}
            Err(e) => {
                // one failing reminder must not stop the rest
                report.delivery_failures += 1;
                tracing::warn!(slip_id = reminder.slip_id, "Failed to deliver reminder: {}", e);
            }
        }
    }

    report.payments_expired = crate::payment::expire_stale(&state.db, now).await?;

    state.metrics.add_reminders(report.due_soon_queued + report.overdue_queued);
    state.metrics.inc_job_runs();
    tracing::info!(
        overdue = report.slips_marked_overdue,
        due_soon = report.due_soon_queued,
        overdue_notices = report.overdue_queued,
        expired_payments = report.payments_expired,
        "Daily job finished for {}",
        today
    );
    Ok(report)
}

/// Starts the background runner. It wakes every `jobs.interval_secs` and runs
/// [`run_daily`] once per calendar day until `cancel` fires.
pub fn spawn(state: AppState, cancel: CancellationToken) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.jobs.interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_run: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Daily job runner stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let today = crate::today();
                    if last_run == Some(today) {
                        continue;
                    }
                    match run_daily(&state, today, Utc::now()).await {
                        Ok(_) => last_run = Some(today),
                        // retried on the next tick
                        Err(e) => tracing::warn!("Daily job failed: {}", e),
                    }
                }
            }
        }
    })
}
