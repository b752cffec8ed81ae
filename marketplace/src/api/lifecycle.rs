use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;

use super::{JsonBody, PathParam, QueryParams};
use crate::{
    auth::AuthContext,
    error::AppError,
    lifecycle::{ExchangeFilters, Rating, StatusChange},
    models::{ExchangeStatus, RequestStatus},
    server::AppState,
    validation::{ExchangeForm, validate_exchange_proposal, validate_message, validate_rating},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewRequest {
    #[serde(alias = "item_id")]
    item_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RequestStatusBody {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewExchange {
    #[serde(alias = "request_id")]
    request_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeStatusBody {
    status: Option<String>,
    message: Option<String>,
    #[serde(alias = "accepted_price")]
    accepted_price: Option<f64>,
    terms: Option<String>,
}

impl ExchangeStatusBody {
    fn into_change(self) -> Result<StatusChange, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::validation("Status is required."))?
            .parse::<ExchangeStatus>()
            .map_err(AppError::validation)?;
        Ok(StatusChange {
            status,
            message: self.message,
            accepted_price: self.accepted_price,
            terms: self.terms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteBody {
    rating: Option<i64>,
    feedback: Option<String>,
    #[serde(alias = "completion_notes")]
    completion_notes: Option<String>,
}

// ========== Requests ==========

async fn create_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    JsonBody(body): JsonBody<NewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let item_id = body.item_id.ok_or_else(|| AppError::validation("Item is required."))?;
    let request = state.lifecycle.create_request(item_id, ctx.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Request created successfully", "request": request })),
    ))
}

async fn list_requests(State(state): State<AppState>, ctx: AuthContext) -> Result<impl IntoResponse, AppError> {
    let requests = state.lifecycle.list_requests(ctx.user_id).await?;
    Ok(Json(json!({ "requests": requests })))
}

async fn get_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.lifecycle.get_request(id, ctx.user_id).await?;
    Ok(Json(json!({ "request": request })))
}

async fn update_request_status(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody<RequestStatusBody>,
) -> Result<impl IntoResponse, AppError> {
    let status = body
        .status
        .as_deref()
        .unwrap_or_default()
        .parse::<RequestStatus>()
        .map_err(AppError::validation)?;
    let request = state.lifecycle.update_request_status(id, status, ctx.user_id).await?;
    Ok(Json(json!({ "message": "Request status updated", "request": request })))
}

async fn delete_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.lifecycle.delete_request(id, ctx.user_id).await?;
    Ok(Json(json!({ "message": "Request deleted" })))
}

// ========== Exchanges ==========

async fn create_exchange(
    State(state): State<AppState>,
    ctx: AuthContext,
    JsonBody(body): JsonBody<NewExchange>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = body
        .request_id
        .ok_or_else(|| AppError::validation("Request is required."))?;
    let exchange = state
        .lifecycle
        .create_exchange_from_request(request_id, ctx.user_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Exchange created successfully", "exchange": exchange })),
    ))
}

async fn propose_exchange(
    State(state): State<AppState>,
    ctx: AuthContext,
    JsonBody(form): JsonBody<ExchangeForm>,
) -> Result<impl IntoResponse, AppError> {
    let proposal = validate_exchange_proposal(&form)?;
    let exchange = state.lifecycle.propose_exchange(ctx.user_id, proposal).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Exchange request created successfully", "exchange": exchange })),
    ))
}

async fn list_exchanges(
    State(state): State<AppState>,
    ctx: AuthContext,
    QueryParams(filters): QueryParams<ExchangeFilters>,
) -> Result<impl IntoResponse, AppError> {
    let exchanges = state.lifecycle.list_exchanges(ctx.user_id, &filters).await?;
    Ok(Json(json!({ "exchanges": exchanges })))
}

async fn get_exchange(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exchange = state.lifecycle.get_exchange(id, ctx.user_id).await?;
    Ok(Json(json!({ "exchange": exchange })))
}

async fn update_exchange_status(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody<ExchangeStatusBody>,
) -> Result<impl IntoResponse, AppError> {
    let change = body.into_change()?;
    let exchange = state
        .lifecycle
        .update_exchange_status(id, change, ctx.user_id)
        .await?;
    Ok(Json(json!({ "message": "Exchange status updated successfully", "exchange": exchange })))
}

async fn add_message(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody<MessageBody>,
) -> Result<impl IntoResponse, AppError> {
    let text = validate_message(body.message.as_deref())?;
    let exchange = state.lifecycle.add_message(id, ctx.user_id, text).await?;
    Ok(Json(json!({ "message": "Message added successfully", "exchange": exchange })))
}

async fn complete_exchange(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody<CompleteBody>,
) -> Result<impl IntoResponse, AppError> {
    let rating = Rating {
        stars: validate_rating(body.rating)?,
        feedback: body.feedback,
        notes: body.completion_notes,
    };
    let exchange = state.lifecycle.complete_exchange(id, ctx.user_id, rating).await?;
    Ok(Json(json!({ "message": "Exchange completion updated successfully", "exchange": exchange })))
}

async fn available_items(State(state): State<AppState>, ctx: AuthContext) -> Result<impl IntoResponse, AppError> {
    let items = state.catalog.available_for_trade(ctx.user_id).await?;
    Ok(Json(json!({ "items": items })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/{id}", get(get_request).delete(delete_request))
        .route("/requests/{id}/status", put(update_request_status))
        .route("/exchanges", get(list_exchanges).post(create_exchange))
        .route("/exchanges/{id}", get(get_exchange))
        .route("/exchanges/{id}/status", put(update_exchange_status))
        .route("/trading", post(propose_exchange))
        .route("/trading/my-exchanges", get(list_exchanges))
        .route("/trading/available-items", get(available_items))
        .route("/trading/{id}", get(get_exchange))
        .route("/trading/{id}/status", put(update_exchange_status))
        .route("/trading/{id}/messages", post(add_message))
        .route("/trading/{id}/complete", post(complete_exchange))
}
