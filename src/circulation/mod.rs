//! Circulation desk rules.
//!
//! The pure date and fine arithmetic lives here; the database workflows that use
//! it are split by concern:
//!
//! - [`loans`]: opening borrow slips, returns, renewals, slip queries
//! - [`requests`]: reader borrow requests and their approval
//! - [`overdue`]: the overdue sweep and reminder targets used by the daily job

pub mod loans;
pub mod overdue;
pub mod requests;

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

pub use crate::config::CirculationConfig as CirculationPolicy;
use crate::types::{FineReason, ReturnCondition};

const KEY_LOAN_DAYS: &str = "loan_days";
const KEY_DAILY_FINE: &str = "daily_fine";
const KEY_MAX_ACTIVE_LOANS: &str = "max_active_loans";
const KEY_MAX_RENEWALS: &str = "max_renewals";
const KEY_DAMAGED_FINE_PERCENT: &str = "damaged_fine_percent";
const KEY_LOST_FINE_PERCENT: &str = "lost_fine_percent";
const KEY_REMINDER_DAYS_BEFORE: &str = "reminder_days_before";
const KEY_BLOCK_ON_UNPAID_FINES: &str = "block_on_unpaid_fines";

impl CirculationPolicy {
    fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_LOAN_DAYS, self.loan_days.to_string()),
            (KEY_DAILY_FINE, self.daily_fine.to_string()),
            (KEY_MAX_ACTIVE_LOANS, self.max_active_loans.to_string()),
            (KEY_MAX_RENEWALS, self.max_renewals.to_string()),
            (KEY_DAMAGED_FINE_PERCENT, self.damaged_fine_percent.to_string()),
            (KEY_LOST_FINE_PERCENT, self.lost_fine_percent.to_string()),
            (KEY_REMINDER_DAYS_BEFORE, self.reminder_days_before.to_string()),
            (KEY_BLOCK_ON_UNPAID_FINES, self.block_on_unpaid_fines.to_string()),
        ]
    }

    /// Reads the policy from `system_config`. Missing or unparsable keys fall back
    /// to the built-in defaults with a warning.
    pub async fn load(pool: &SqlitePool) -> sqlx::Result<Self> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM system_config")
            .fetch_all(pool)
            .await?;
        let map: HashMap<String, String> = rows.into_iter().collect();
        let defaults = Self::default();

        fn int(map: &HashMap<String, String>, key: &str, fallback: i64) -> i64 {
            match map.get(key).map(|v| v.trim().parse::<i64>()) {
                Some(Ok(v)) => v,
                Some(Err(_)) => {
                    tracing::warn!("system_config.{} is not a number, using {}", key, fallback);
                    fallback
                }
                None => fallback,
            }
        }

        Ok(Self {
            loan_days: int(&map, KEY_LOAN_DAYS, defaults.loan_days),
            daily_fine: int(&map, KEY_DAILY_FINE, defaults.daily_fine),
            max_active_loans: int(&map, KEY_MAX_ACTIVE_LOANS, defaults.max_active_loans),
            max_renewals: int(&map, KEY_MAX_RENEWALS, defaults.max_renewals),
            damaged_fine_percent: int(&map, KEY_DAMAGED_FINE_PERCENT, defaults.damaged_fine_percent),
            lost_fine_percent: int(&map, KEY_LOST_FINE_PERCENT, defaults.lost_fine_percent),
            reminder_days_before: int(&map, KEY_REMINDER_DAYS_BEFORE, defaults.reminder_days_before),
            block_on_unpaid_fines: map
                .get(KEY_BLOCK_ON_UNPAID_FINES)
                .map(|v| matches!(v.trim(), "true" | "1"))
                .unwrap_or(defaults.block_on_unpaid_fines),
        })
    }

    /// Inserts keys that are not stored yet; existing values are kept.
    pub async fn seed_missing(pool: &SqlitePool, seed: &Self) -> sqlx::Result<()> {
        let now = Utc::now();
        for (key, value) in seed.to_pairs() {
            sqlx::query("INSERT OR IGNORE INTO system_config (key, value, updated_at) VALUES (?1, ?2, ?3)")
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(pool)
                .await?;
        }
        Ok(())
    }

    /// Overwrites every key in one transaction.
    pub async fn save(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        let now = Utc::now();
        let mut tx = crate::db::begin_write(pool).await?;
        for (key, value) in self.to_pairs() {
            sqlx::query(
                r#"INSERT INTO system_config (key, value, updated_at) VALUES (?1, ?2, ?3)
                   ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }
}

/// Due date of a loan opened on `borrowed_on`.
pub fn due_date(borrowed_on: NaiveDate, loan_days: i64) -> NaiveDate {
    borrowed_on + Duration::days(loan_days)
}

/// Whole days past `due_on`; zero when returned on or before the due date.
pub fn overdue_days(due_on: NaiveDate, returned_on: NaiveDate) -> i64 {
    (returned_on - due_on).num_days().max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FineAssessment {
    pub reason: FineReason,
    pub amount: i64,
}

/// Fines owed for one returned copy.
///
/// Lateness is charged per day regardless of condition: a copy reported lost
/// after its due date owes both the late fee and the replacement share.
/// Zero amounts are dropped.
pub fn assess_return(
    policy: &CirculationPolicy,
    due_on: NaiveDate,
    returned_on: NaiveDate,
    condition: ReturnCondition,
    price: i64,
) -> Vec<FineAssessment> {
    let mut fines = Vec::with_capacity(2);

    let late = overdue_days(due_on, returned_on).saturating_mul(policy.daily_fine);
    if late > 0 {
        fines.push(FineAssessment { reason: FineReason::Late, amount: late });
    }

    let price = price.max(0);
    let condition_fine = match condition {
        ReturnCondition::Good => None,
        ReturnCondition::Damaged => {
            Some((FineReason::Damaged, price.saturating_mul(policy.damaged_fine_percent) / 100))
        }
        ReturnCondition::Lost => Some((FineReason::Lost, price.saturating_mul(policy.lost_fine_percent) / 100)),
    };
    if let Some((reason, amount)) = condition_fine {
        if amount > 0 {
            fines.push(FineAssessment { reason, amount });
        }
    }

    fines
}
