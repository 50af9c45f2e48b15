use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    middleware::{ip::ClientIp, CurrentUser},
    payment,
    state::AppState,
    types::{CreatePaymentRequest, PaymentDto, PaymentQuery},
};

/// Readers pay their own fines; staff open a payment on behalf of a named reader.
pub async fn create_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentDto>)> {
    let reader_id = if user.role.is_staff() {
        req.reader_id.ok_or_else(|| AppError::ValidationError {
            field: "reader_id".to_string(),
            message: "Staff must name the reader".to_string(),
        })?
    } else {
        let own = user.require_reader()?;
        if req.reader_id.is_some_and(|id| id != own) {
            return Err(AppError::Forbidden("You may only pay your own fines".to_string()));
        }
        own
    };

    let dto = payment::create_payment(
        &state.db,
        &state.config.payment,
        reader_id,
        req.fine_ids.as_deref(),
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

/// Polled by the client while the QR code is shown.
pub async fn get_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> AppResult<Json<PaymentDto>> {
    state.rate_limiter.check_endpoint_limit("/api/payments/{id}", ip).await?;

    let current = payment::fetch_payment(&state.db, id).await?;
    if !user.can_access_reader(current.reader_id) {
        return Err(AppError::Forbidden("This payment belongs to another reader".to_string()));
    }

    let (dto, confirmed) = payment::refresh_payment(&state.db, state.gateway.as_ref(), id, Utc::now()).await?;
    if confirmed {
        state.metrics.inc_payments_confirmed();
    }
    Ok(Json(dto))
}

pub async fn list_payments(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(q): Query<PaymentQuery>,
) -> AppResult<Json<Vec<PaymentDto>>> {
    user.require_staff()?;
    Ok(Json(payment::list_payments(&state.db, q.reader_id).await?))
}
