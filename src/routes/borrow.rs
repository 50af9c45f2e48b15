use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    circulation::{loans, CirculationPolicy},
    error::{AppError, AppResult},
    middleware::CurrentUser,
    state::AppState,
    types::{BorrowRequest, OverdueSlip, Page, ReturnOutcome, ReturnRequest, SlipDto, SlipQuery, SlipSummary},
};

pub async fn create_borrow(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<SlipDto>)> {
    user.require_staff()?;
    let policy = CirculationPolicy::load(&state.db).await?;
    let slip = loans::borrow(&state.db, &policy, &req, user.account_id, crate::today()).await?;
    state.metrics.record_loan(slip.lines.len() as u64);
    Ok((StatusCode::CREATED, Json(slip)))
}

pub async fn list_borrows(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<SlipQuery>,
) -> AppResult<Json<Page<SlipSummary>>> {
    user.require_staff()?;
    Ok(Json(loans::list_slips(&state.db, &q).await?))
}

pub async fn get_borrow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<SlipDto>> {
    let mut conn = state.db.acquire().await?;
    let slip = loans::fetch_slip(&mut conn, id).await?;
    if !user.can_access_reader(slip.slip.reader_id) {
        return Err(AppError::Forbidden("This borrow slip belongs to another reader".to_string()));
    }
    Ok(Json(slip))
}

pub async fn list_overdue(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<OverdueSlip>>> {
    user.require_staff()?;
    Ok(Json(loans::overdue_slips(&state.db, crate::today()).await?))
}

pub async fn return_borrow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ReturnRequest>,
) -> AppResult<Json<ReturnOutcome>> {
    user.require_staff()?;
    let policy = CirculationPolicy::load(&state.db).await?;
    let outcome = loans::return_items(&state.db, &policy, id, &req, user.account_id, crate::today()).await?;
    state.metrics.add_returns(outcome.returns.len() as u64);
    for fine in &outcome.fines {
        state.metrics.record_fine(fine.amount);
    }
    Ok(Json(outcome))
}

pub async fn renew_borrow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<SlipDto>> {
    user.require_staff()?;
    let policy = CirculationPolicy::load(&state.db).await?;
    Ok(Json(loans::renew(&state.db, &policy, id, crate::today()).await?))
}
