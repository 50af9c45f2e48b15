use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    error::AppResult,
    middleware::CurrentUser,
    payment,
    state::AppState,
    types::{FineDto, FineQuery},
};

pub async fn list_fines(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<FineQuery>,
) -> AppResult<Json<Vec<FineDto>>> {
    user.require_staff()?;
    Ok(Json(payment::list_fines(&state.db, &q).await?))
}

/// Cash at the desk.
pub async fn pay_fine(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<FineDto>> {
    user.require_staff()?;
    Ok(Json(payment::pay_fine_at_desk(&state.db, id, chrono::Utc::now()).await?))
}
