use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    circulation::{requests, CirculationPolicy},
    error::{AppError, AppResult},
    middleware::CurrentUser,
    state::AppState,
    types::{CreateBorrowRequest, RejectRequest, RequestDto, RequestQuery},
};

pub async fn create_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateBorrowRequest>,
) -> AppResult<(StatusCode, Json<RequestDto>)> {
    let reader_id = user.require_reader()?;
    let policy = CirculationPolicy::load(&state.db).await?;
    let dto = requests::create(&state.db, &policy, reader_id, &req, crate::today()).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<RequestQuery>,
) -> AppResult<Json<Vec<RequestDto>>> {
    user.require_staff()?;
    Ok(Json(requests::list(&state.db, &q).await?))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<RequestDto>> {
    let mut conn = state.db.acquire().await?;
    let dto = requests::fetch(&mut conn, id).await?;
    if !user.can_access_reader(dto.reader_id) {
        return Err(AppError::Forbidden("This request belongs to another reader".to_string()));
    }
    Ok(Json(dto))
}

/// Responds with `{request, slip}`.
pub async fn approve_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    user.require_staff()?;
    let policy = CirculationPolicy::load(&state.db).await?;
    let (request, slip) = requests::approve(&state.db, &policy, id, user.account_id, crate::today()).await?;
    state.metrics.inc_requests_approved();
    state.metrics.record_loan(slip.lines.len() as u64);
    Ok(Json(json!({ "request": request, "slip": slip })))
}

pub async fn reject_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> AppResult<Json<RequestDto>> {
    user.require_staff()?;
    let dto = requests::reject(&state.db, id, user.account_id, &req.reason).await?;
    state.metrics.inc_requests_rejected();
    Ok(Json(dto))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<RequestDto>> {
    let reader_id = user.require_reader()?;
    Ok(Json(requests::cancel(&state.db, id, reader_id).await?))
}
