use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    circulation::CirculationPolicy,
    error::{AppError, AppResult},
    jobs::{self, DailyReport},
    middleware::CurrentUser,
    state::AppState,
};

/// Every field is optional; omitted ones keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub loan_days: Option<i64>,
    pub daily_fine: Option<i64>,
    pub max_active_loans: Option<i64>,
    pub max_renewals: Option<i64>,
    pub damaged_fine_percent: Option<i64>,
    pub lost_fine_percent: Option<i64>,
    pub reminder_days_before: Option<i64>,
    pub block_on_unpaid_fines: Option<bool>,
}

impl SettingsUpdate {
    pub fn apply(self, mut policy: CirculationPolicy) -> CirculationPolicy {
        if let Some(v) = self.loan_days {
            policy.loan_days = v;
        }
        if let Some(v) = self.daily_fine {
            policy.daily_fine = v;
        }
        if let Some(v) = self.max_active_loans {
            policy.max_active_loans = v;
        }
        if let Some(v) = self.max_renewals {
            policy.max_renewals = v;
        }
        if let Some(v) = self.damaged_fine_percent {
            policy.damaged_fine_percent = v;
        }
        if let Some(v) = self.lost_fine_percent {
            policy.lost_fine_percent = v;
        }
        if let Some(v) = self.reminder_days_before {
            policy.reminder_days_before = v;
        }
        if let Some(v) = self.block_on_unpaid_fines {
            policy.block_on_unpaid_fines = v;
        }
        policy
    }
}

pub async fn get_settings(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<CirculationPolicy>> {
    user.require_staff()?;
    Ok(Json(CirculationPolicy::load(&state.db).await?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<CirculationPolicy>> {
    user.require_admin()?;
    let policy = update.apply(CirculationPolicy::load(&state.db).await?);
    crate::config::validate_circulation(&policy).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    policy.save(&state.db).await?;
    tracing::info!("Circulation settings updated by {}: {:?}", user.username, policy);
    Ok(Json(policy))
}

/// Runs the daily job now, on top of the scheduled run.
pub async fn run_jobs(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<DailyReport>> {
    user.require_admin()?;
    tracing::info!("Daily job triggered manually by {}", user.username);
    Ok(Json(jobs::run_daily(&state, crate::today(), chrono::Utc::now()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_other_fields() {
        let base = CirculationPolicy::default();
        let updated = SettingsUpdate { daily_fine: Some(3000), ..Default::default() }.apply(base.clone());
        assert_eq!(updated.daily_fine, 3000);
        assert_eq!(updated.loan_days, base.loan_days);
        assert_eq!(updated.block_on_unpaid_fines, base.block_on_unpaid_fines);
    }
}
