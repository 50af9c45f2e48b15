//! Reader self-service views. Every handler is scoped to the caller's own reader profile.

use axum::{extract::State, Json};

use crate::{
    circulation::{loans, requests},
    error::AppResult,
    middleware::CurrentUser,
    notify, payment,
    state::AppState,
    types::{FineDto, FineQuery, NotificationDto, ReaderDto, RequestDto, RequestQuery, SlipDto},
};

pub async fn my_profile(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<ReaderDto>> {
    let reader_id = user.require_reader()?;
    Ok(Json(super::readers::fetch_reader(&state.db, reader_id).await?))
}

pub async fn my_loans(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<SlipDto>>> {
    let reader_id = user.require_reader()?;
    Ok(Json(loans::reader_history(&state.db, reader_id).await?))
}

pub async fn my_fines(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<FineDto>>> {
    let reader_id = user.require_reader()?;
    let q = FineQuery { reader_id: Some(reader_id), ..Default::default() };
    Ok(Json(payment::list_fines(&state.db, &q).await?))
}

pub async fn my_requests(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<RequestDto>>> {
    let reader_id = user.require_reader()?;
    let q = RequestQuery { reader_id: Some(reader_id), ..Default::default() };
    Ok(Json(requests::list(&state.db, &q).await?))
}

pub async fn my_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<NotificationDto>>> {
    let reader_id = user.require_reader()?;
    Ok(Json(notify::list_for_reader(&state.db, reader_id).await?))
}
