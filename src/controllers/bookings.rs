use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{to_api_error, ApiResult},
    middleware::{ApiJson, Caller},
    models::{
        BookingFilter, BookingPatch, BookingRequest, BookingStatus, PaymentVerification, SortOrder,
    },
    AppState,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/initiate", post(initiate_booking))
        .route("/bookings/verify", post(verify_payment))
        .route(
            "/bookings/{id}",
            get(get_booking).put(update_booking).delete(cancel_booking),
        )
}

/* ---------- CREATE ---------- */

// POST /bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(mut req): ApiJson<BookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.requester_user_id = caller.user_id;

    let outcome = state.lifecycle.create(req).await?;
    let created = outcome.is_created();
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((status, Json(json!({
        "success": true,
        "created": created,
        "booking": outcome.into_booking(),
    }))))
}

// POST /bookings/initiate
#[derive(Debug, Deserialize)]
struct InitiateRequest {
    #[serde(flatten)]
    booking: BookingRequest,
    amount: Option<i64>,
}

async fn initiate_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(req): ApiJson<InitiateRequest>,
) -> ApiResult<impl IntoResponse> {
    let InitiateRequest { mut booking, amount } = req;
    booking.requester_user_id = caller.user_id;

    let (booking, order) = state.lifecycle.initiate(booking, amount).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "booking": booking,
        "order": order,
    }))))
}

// POST /bookings/verify - защищён подписью, а не сессией
async fn verify_payment(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PaymentVerification>,
) -> ApiResult<impl IntoResponse> {
    let booking = state.lifecycle.verify_payment(&req).await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "booking": booking }))))
}

/* ---------- READ ---------- */

// GET /bookings
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    /// Через запятую: pending,confirmed
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    sort: Option<String>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
    email: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<Uuid>,
}

fn parse_statuses(raw: &str) -> Result<Vec<BookingStatus>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<BookingStatus>)
        .collect()
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let me = caller.require_authenticated()?;

    let statuses = match params.status.as_deref() {
        Some(raw) => parse_statuses(raw).map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e))?,
        None => Vec::new(),
    };
    let sort = match params.sort.as_deref() {
        Some(raw) => raw
            .parse::<SortOrder>()
            .map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e))?,
        None => SortOrder::default(),
    };

    // Обычный пользователь видит только свои брони
    let (requester_user_id, requester_email) = if caller.is_privileged() {
        (params.user_id, params.email)
    } else {
        if params.email.is_some() || params.user_id.is_some_and(|id| id != me) {
            return Err(to_api_error(StatusCode::FORBIDDEN, "Insufficient permissions"));
        }
        (Some(me), None)
    };

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let filter = BookingFilter {
        statuses,
        from: params.from,
        to: params.to,
        requester_user_id,
        requester_email,
        sort,
        limit: Some(i64::from(page_size)),
        offset: Some(i64::from(page - 1) * i64::from(page_size)),
    };

    let bookings = state.lifecycle.list(&filter).await?;
    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "page": page,
        "pageSize": page_size,
        "bookings": bookings,
    }))))
}

// GET /bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let me = caller.require_authenticated()?;
    let booking = state.lifecycle.get_by_id(id).await?;

    if !caller.is_privileged() && !booking.is_owned_by(me) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Booking belongs to another user"));
    }

    Ok((StatusCode::OK, Json(json!({ "success": true, "booking": booking }))))
}

/* ---------- MUTATIONS (privileged) ---------- */

// PUT /bookings/{id}
async fn update_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    ApiJson(patch): ApiJson<BookingPatch>,
) -> ApiResult<impl IntoResponse> {
    caller.require_privileged()?;

    let booking = state.lifecycle.update(id, patch).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "booking": booking }))))
}

// DELETE /bookings/{id} - мягкая отмена, строка остаётся
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require_privileged()?;

    let booking = state.lifecycle.cancel(id).await?;
    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "message": "Booking cancelled",
        "booking": booking,
    }))))
}
